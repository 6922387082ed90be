//! Display-ready values built from stored records.
//!
//! Nothing in here mutates a stored entity; every value is a fresh mapping from a
//! record plus whatever context (solved set, page offset, rank) the caller computed.

use std::collections::HashSet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use crate::models::{Category, Challenge, ChallengeId, Profile, SolvedRecord, UserId};
use crate::pagination::Page;

pub const CHALLENGES_PER_PAGE: usize = 12;
pub const LEADERBOARD_SIZE: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct ChallengeFilter {
	/// case-insensitive match over title, description and category
	pub query: Option<String>,
	pub category: Option<Category>
}

impl ChallengeFilter {
	pub fn matches(&self, challenge: &Challenge) -> bool {
		if self.category.is_some_and(|c| c != challenge.category) {
			return false;
		}

		match self.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
			Some(q) => {
				let q = q.to_lowercase();
				challenge.title.to_lowercase().contains(&q)
					|| challenge.description.to_lowercase().contains(&q)
					|| challenge.category.code().to_lowercase().contains(&q)
			},
			None => true
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChallengeCard {
	/// 1-based position in the filtered list
	#[schema(example = 13)]
	pub serial_number: usize,
	pub id: ChallengeId,
	#[schema(example = "Network Diagnostic Tool")]
	pub title: String,
	pub category: Category,
	#[schema(example = 500)]
	pub points: i32,
	pub is_solved: bool,
	/// attempted at least once but not solved
	pub is_attempted: bool,
	pub has_lab: bool
}

impl ChallengeCard {
	pub fn build(challenge: &Challenge, serial_number: usize, solved: &HashSet<ChallengeId>, attempted: &HashSet<ChallengeId>) -> Self {
		let is_solved = solved.contains(&challenge.id);

		Self {
			serial_number,
			id: challenge.id,
			title: challenge.title.clone(),
			category: challenge.category,
			points: challenge.points,
			is_solved,
			is_attempted: !is_solved && attempted.contains(&challenge.id),
			has_lab: challenge.lab_target().is_some()
		}
	}
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryOption {
	#[schema(example = "Web")]
	pub code: &'static str,
	#[schema(example = "Web Exploitation")]
	pub name: &'static str,
	pub selected: bool
}

pub fn category_options(selected: Option<Category>) -> Vec<CategoryOption> {
	Category::ALL.into_iter().map(|c| CategoryOption {
		code: c.code(),
		name: c.display_name(),
		selected: selected == Some(c)
	}).collect()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChallengeList {
	pub challenges: Vec<ChallengeCard>,
	pub page: usize,
	pub num_pages: usize,
	pub has_more: bool,
	/// every publicly listed challenge, before filtering
	pub total_challenges: usize,
	/// challenges left after filtering
	pub displayed_count: usize,
	pub categories: Vec<CategoryOption>
}

impl ChallengeList {
	pub fn build(page: Page<&Challenge>, total_challenges: usize, solved: &HashSet<ChallengeId>, attempted: &HashSet<ChallengeId>, selected: Option<Category>) -> Self {
		let start = page.start_index;
		let challenges = page.items.iter().enumerate().map(|(i, c)| {
			ChallengeCard::build(c, start + i, solved, attempted)
		}).collect();

		Self {
			challenges,
			page: page.number,
			num_pages: page.num_pages,
			has_more: page.has_more,
			total_challenges,
			displayed_count: page.total,
			categories: category_options(selected)
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LeaderboardEntry {
	#[schema(example = 1)]
	pub rank: usize,
	pub user_id: UserId,
	#[schema(example = 550)]
	pub total_points: i32,
	pub last_solved: Option<DateTime<Utc>>
}

pub fn leaderboard_entries(profiles: Vec<Profile>) -> Vec<LeaderboardEntry> {
	profiles.into_iter().enumerate().map(|(i, p)| LeaderboardEntry {
		rank: i + 1,
		user_id: p.user_id,
		total_points: p.total_points,
		last_solved: p.last_solved
	}).collect()
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SolvedEntry {
	pub challenge_id: ChallengeId,
	#[schema(example = "Manbani Ko'ring")]
	pub title: String,
	pub points_awarded: i32,
	pub solved_at: DateTime<Utc>
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileSummary {
	pub user_id: UserId,
	pub total_points: i32,
	pub last_solved: Option<DateTime<Utc>>,
	/// 1 + number of players with strictly more points
	pub rank: usize,
	/// newest first
	pub solved: Vec<SolvedEntry>
}

impl ProfileSummary {
	pub fn build(profile: Profile, rank: usize, solved: Vec<(SolvedRecord, String)>) -> Self {
		Self {
			user_id: profile.user_id,
			total_points: profile.total_points,
			last_solved: profile.last_solved,
			rank,
			solved: solved.into_iter().map(|(record, title)| SolvedEntry {
				challenge_id: record.challenge_id,
				title,
				points_awarded: record.points_awarded,
				solved_at: record.solved_at
			}).collect()
		}
	}
}
