//! Minimal CSV tables: header row plus string cells.

use std::path::Path;

use crate::error::TableError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Read a `.csv` file. Other extensions are rejected.
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if extension != "csv" {
            return Err(TableError::UnsupportedFormat(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TableError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty());

        let (_, header) = lines.next().ok_or(TableError::MissingHeader)?;
        let headers: Vec<String> = split_line(header, 1)?
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (index, line) in lines {
            let line_no = index + 1;
            let row = split_line(line, line_no)?;
            if row.len() != headers.len() {
                return Err(TableError::Parse {
                    line: line_no,
                    message: format!("expected {} cells, found {}", headers.len(), row.len()),
                });
            }
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Index of the first header matching any of `names`, in order of
    /// preference.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|name| self.headers.iter().position(|h| h == name))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in std::iter::once(&self.headers).chain(&self.rows) {
            let cells: Vec<String> = row.iter().map(|c| quote(c)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        std::fs::write(path, self.render()).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn quote(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn split_line(line: &str, line_no: usize) -> Result<Vec<String>, TableError> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                chars.next();
                cell.push('"');
            }
            ('"', true) => in_quotes = false,
            ('"', false) if cell.trim().is_empty() => {
                cell.clear();
                in_quotes = true;
            }
            (',', false) => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    if in_quotes {
        return Err(TableError::Parse {
            line: line_no,
            message: "unterminated quoted field".to_string(),
        });
    }
    cells.push(cell);
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_cells() {
        let table = Table::parse("id,name\n1,\"Water, deep\"\n2,\"say \"\"hi\"\"\"\n").unwrap();
        assert_eq!(table.headers(), ["id", "name"]);
        assert_eq!(table.rows()[0], ["1", "Water, deep"]);
        assert_eq!(table.rows()[1], ["2", "say \"hi\""]);
    }

    #[test]
    fn column_preference_order() {
        let table = Table::parse("FID,CLASSIFIED,RASTERVALU\n0,1,1\n").unwrap();
        assert_eq!(table.column(&["true_label", "CLASSIFIED"]), Some(1));
        assert_eq!(table.column(&["predicted_label", "RASTERVALU"]), Some(2));
        assert_eq!(table.column(&["missing"]), None);
    }

    #[test]
    fn ragged_row_rejected() {
        let err = Table::parse("a,b\n1,2\n3\n").unwrap_err();
        assert!(matches!(err, TableError::Parse { line: 3, .. }));
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(Table::parse("\n\n"), Err(TableError::MissingHeader)));
    }

    #[test]
    fn render_then_parse() {
        let table = Table::new(
            vec!["class".into(), "name".into()],
            vec![vec!["1".into(), "crop, wet".into()]],
        );
        assert_eq!(Table::parse(&table.render()).unwrap(), table);
    }

    #[test]
    fn non_csv_extension_rejected() {
        let err = Table::read(Path::new("samples.xlsx")).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedFormat(_)));
    }
}
