//! The tabular data model: rows of text cells, and offset-tagged chunks.

/// A single row: an ordered sequence of text cells. Position is the column
/// index.
pub type Row = Vec<String>;

/// An ordered sequence of rows. Row position encodes the row's original
/// index in the source.
pub type Table = Vec<Row>;

/// A contiguous sub-sequence of table rows, tagged with its position in the
/// full input.
///
/// `offset` is the global index of the first row, so offset-dependent
/// filters (row ranges) evaluate correctly inside a chunk that does not
/// start at row 0. `seq` is the monotonically increasing chunk sequence
/// number used by the ordered merger to reassemble worker outputs.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk sequence number (0-based, dispatch order).
    pub seq: u64,

    /// Global row index of the first row in this chunk.
    pub offset: usize,

    /// The chunk's rows.
    pub rows: Vec<Row>,
}

impl Chunk {
    /// Create a chunk from its sequence number, starting offset, and rows.
    pub fn new(seq: u64, offset: usize, rows: Vec<Row>) -> Self {
        Self { seq, offset, rows }
    }

    /// Number of rows in the chunk.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the chunk holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Coerce a cell to a number. Surrounding whitespace is ignored; failure is
/// reported to the caller as `None` so each operation can apply its own
/// coercion policy.
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

/// Render a numeric result back into a cell.
///
/// Integer-valued results print without a fractional part (sums of integer
/// columns stay integers); everything else uses the shortest round-trip
/// float representation.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// Convenience for building rows in tests and examples.
pub fn row<S: Into<String>>(cells: impl IntoIterator<Item = S>) -> Row {
    cells.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42.0));
        assert_eq!(parse_number(" 3.5 "), Some(3.5));
        assert_eq!(parse_number("-7"), Some(-7.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_format_number_integers_stay_integers() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-17.0), "-17");
        assert_eq!(format_number(0.0), "0");
    }

    #[test]
    fn test_format_number_fractional() {
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_chunk_accessors() {
        let chunk = Chunk::new(3, 300, vec![row(["a", "b"]), row(["c", "d"])]);
        assert_eq!(chunk.seq, 3);
        assert_eq!(chunk.offset, 300);
        assert_eq!(chunk.len(), 2);
        assert!(!chunk.is_empty());
        assert!(Chunk::new(0, 0, vec![]).is_empty());
    }
}
