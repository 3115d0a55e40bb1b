use std::{collections::HashMap, io::Read};

use csv::{ReaderBuilder, Trim};

use crate::error::{ChoroplethError, Result};

/// Cell spellings read as "no value", the same set pandas treats as NA.
pub const MISSING_MARKERS: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// An uploaded measurement table: named columns, rows of raw text cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementTable {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl MeasurementTable {
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(str::to_owned).collect();
        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let mut row: Vec<Option<String>> = record.iter().map(|c| Some(c.to_owned())).collect();
            // Short rows are padded so every column lines up.
            row.resize(headers.len(), None);
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    /// Builds a table from column → value maps. Columns are the union of all
    /// keys in first-seen order; absent keys are missing cells.
    pub fn from_rows(rows: Vec<HashMap<String, Option<String>>>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            let mut keys: Vec<&String> = row.keys().filter(|k| !headers.contains(k)).collect();
            keys.sort();
            headers.extend(keys.into_iter().cloned());
        }
        let rows: Vec<Vec<Option<String>>> = rows
            .into_iter()
            .map(|mut row| {
                headers
                    .iter()
                    .map(|h| row.remove(h).flatten())
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of the named column, one per row.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = Option<&str>> + '_> {
        let idx = self.headers.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(move |r| r.get(idx).and_then(|c| c.as_deref())))
    }
}

/// Running arithmetic mean. Updated incrementally so finite inputs never
/// overflow to an infinite mean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean {
    mean: f64,
    n: usize,
}

impl Mean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, v: f64) {
        self.n += 1;
        let n = self.n as f64;
        self.mean += v / n - self.mean / n;
    }

    pub fn ave(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }
}

fn is_missing(cell: Option<&str>) -> bool {
    match cell {
        None => true,
        Some(c) => MISSING_MARKERS.contains(&c.trim()),
    }
}

/// Mean of the column named after `metric`, skipping missing cells.
///
/// Fails with a schema error when the column is absent and with an
/// empty-input error when no cell carries a value. A cell that is present but
/// not a finite number rejects the whole table.
pub fn aggregate(metric: &str, table: &MeasurementTable) -> Result<f64> {
    let column = table
        .column(metric)
        .ok_or_else(|| ChoroplethError::schema(format!("\"{}\" column not found", metric)))?;

    let mut mean = Mean::new();
    for (i, cell) in column.enumerate() {
        if is_missing(cell) {
            continue;
        }
        let raw = cell.unwrap_or_default().trim();
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => mean.add(v),
            _ => {
                return Err(ChoroplethError::InvalidValue {
                    column: metric.to_owned(),
                    // 1-based, counting the header line.
                    row: i + 2,
                    value: raw.to_owned(),
                })
            }
        }
    }

    mean.ave().ok_or_else(|| ChoroplethError::EmptyInput {
        metric: metric.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(text: &str) -> MeasurementTable {
        MeasurementTable::from_csv(text.as_bytes()).unwrap()
    }

    #[test]
    fn mean_ignores_missing_cells() {
        let table = csv("date,temperature\n1,10\n2,\n3,NaN\n4,20\n5,N/A\n6,15.5\n");
        let mean = aggregate("temperature", &table).unwrap();
        assert!((mean - 15.166_666_666_666_666).abs() < 1e-12);
    }

    #[test]
    fn missing_column_is_schema_error() {
        let table = csv("date,humidity\n1,50\n");
        let err = aggregate("temperature", &table).unwrap_err();
        assert!(matches!(err, ChoroplethError::Schema(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn header_whitespace_is_ignored() {
        let table = csv("date, temperature \n1,12\n");
        assert_eq!(aggregate("temperature", &table).unwrap(), 12.0);
    }

    #[test]
    fn column_name_is_case_sensitive() {
        let table = csv("Temperature\n12\n");
        assert!(matches!(
            aggregate("temperature", &table),
            Err(ChoroplethError::Schema(_))
        ));
    }

    #[test]
    fn all_missing_is_empty_input() {
        let table = csv("temperature\n\nNA\nnull\n");
        assert!(matches!(
            aggregate("temperature", &table),
            Err(ChoroplethError::EmptyInput { .. })
        ));
    }

    #[test]
    fn zero_rows_is_empty_input() {
        let table = csv("temperature\n");
        assert!(table.is_empty());
        assert!(matches!(
            aggregate("temperature", &table),
            Err(ChoroplethError::EmptyInput { .. })
        ));
    }

    #[test]
    fn real_zero_is_a_value() {
        let table = csv("slope\n0\n0.0\n");
        assert_eq!(aggregate("slope", &table).unwrap(), 0.0);
    }

    #[test]
    fn non_numeric_cell_is_rejected() {
        let table = csv("temperature\n12\nwarm\n");
        match aggregate("temperature", &table) {
            Err(ChoroplethError::InvalidValue { row, value, .. }) => {
                assert_eq!(row, 3);
                assert_eq!(value, "warm");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn huge_values_keep_a_finite_mean() {
        let table = csv("temperature\n1e308\n1e308\n");
        let mean = aggregate("temperature", &table).unwrap();
        assert!(mean.is_finite());
        assert!((mean / 1e308 - 1.0).abs() < 1e-12);

        let table = csv("temperature\n1.7e308\n-1.7e308\n");
        assert_eq!(aggregate("temperature", &table).unwrap(), 0.0);
    }

    #[test]
    fn short_rows_are_padded() {
        let table = csv("date,temperature\n1,14\n2\n");
        assert_eq!(table.len(), 2);
        assert_eq!(aggregate("temperature", &table).unwrap(), 14.0);
    }

    #[test]
    fn from_rows_unions_columns() {
        let rows = vec![
            HashMap::from([("temperature".to_owned(), Some("10".to_owned()))]),
            HashMap::from([
                ("temperature".to_owned(), None),
                ("station".to_owned(), Some("A".to_owned())),
            ]),
            HashMap::from([("station".to_owned(), Some("B".to_owned()))]),
        ];
        let table = MeasurementTable::from_rows(rows);
        assert_eq!(table.headers(), ["temperature", "station"]);
        assert_eq!(aggregate("temperature", &table).unwrap(), 10.0);
    }
}
