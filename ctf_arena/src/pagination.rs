#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
	pub items: Vec<T>,
	/// 1-based number of this page after clamping
	pub number: usize,
	pub num_pages: usize,
	/// 1-based position of the first item overall, 0 when there are no items
	pub start_index: usize,
	pub has_more: bool,
	pub total: usize
}

/// Cuts one page out of an already ordered sequence.
///
/// Missing page numbers mean the first page; out of range numbers clamp to the
/// nearest valid page, so a stale link never produces an error. There is always at
/// least one (possibly empty) page.
pub fn paginate<T>(ordered: Vec<T>, page_size: usize, requested: Option<i64>) -> Page<T> {
	let page_size = page_size.max(1);
	let total = ordered.len();
	let num_pages = total.div_ceil(page_size).max(1);

	let number = match requested {
		None => 1,
		Some(n) if n < 1 => 1,
		Some(n) => usize::try_from(n).map_or(num_pages, |n| n.min(num_pages))
	};

	let offset = (number - 1) * page_size;
	let items: Vec<T> = ordered.into_iter().skip(offset).take(page_size).collect();
	let start_index = if items.is_empty() { 0 } else { offset + 1 };

	Page {
		items,
		number,
		num_pages,
		start_index,
		has_more: number < num_pages,
		total
	}
}

impl<T> Page<T> {
	pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
		Page {
			items: self.items.into_iter().map(f).collect(),
			number: self.number,
			num_pages: self.num_pages,
			start_index: self.start_index,
			has_more: self.has_more,
			total: self.total
		}
	}
}
