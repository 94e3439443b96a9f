//! Cursor pagination shared by every list operation

/// Offset encoded in an opaque cursor. Absent or unparseable cursors start at zero.
pub fn cursor_offset(cursor: Option<&str>) -> usize {
    cursor
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Slice an insertion-ordered sequence into one page.
///
/// Without a page size everything from the cursor onward is returned and no
/// next cursor is produced. With one, `next_cursor` is set only while entries
/// remain past the returned slice.
pub fn paginate<T, I>(entries: I, cursor: Option<&str>, page_size: Option<usize>) -> Page<T>
where
    I: ExactSizeIterator<Item = T>,
{
    let total = entries.len();
    let start = cursor_offset(cursor);
    let rest = entries.skip(start);

    match page_size {
        None => Page {
            items: rest.collect(),
            next_cursor: None,
        },
        Some(size) => {
            let end = start.saturating_add(size);
            Page {
                items: rest.take(size).collect(),
                next_cursor: (end < total).then(|| end.to_string()),
            }
        }
    }
}
