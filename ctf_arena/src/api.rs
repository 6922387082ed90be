pub mod challenges;
pub mod labs;
pub mod leaderboard;
pub mod tournaments;
pub mod teams;
