//! The collectd types.db schema: data-source names and kinds per type.

use std::collections::HashMap;
use std::path::Path;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TypesDbError {
    #[error("line {line}: type has no data sources")]
    MissingSources { line: usize },
    #[error("line {line}: malformed data source {source_spec:?}")]
    MalformedSource { line: usize, source_spec: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSourceKind {
    Gauge,
    Counter,
    Derive,
    Absolute,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataSource {
    pub name: String,
    pub kind: DataSourceKind,
    /// `None` means unbounded (`U` in the file).
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// A merged types database. Later merges win on collision.
#[derive(Clone, Debug, Default)]
pub struct TypesDb {
    types: HashMap<String, Vec<DataSource>>,
}

impl TypesDb {
    /// Parse one types.db document:
    /// `name<ws>ds:kind:min:max[, ds:kind:min:max …]`, `#` comments.
    pub fn parse(text: &str) -> Result<Self, TypesDbError> {
        let mut db = Self::default();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (name, rest) = trimmed
                .split_once(char::is_whitespace)
                .ok_or(TypesDbError::MissingSources { line })?;

            let mut sources = Vec::new();
            for spec in rest.split(',') {
                let spec = spec.trim();
                if spec.is_empty() {
                    continue;
                }
                sources.push(parse_source(line, spec)?);
            }
            if sources.is_empty() {
                return Err(TypesDbError::MissingSources { line });
            }

            db.types.insert(name.to_string(), sources);
        }
        Ok(db)
    }

    /// Merge `other` into this database, `other` winning on collision.
    pub fn merge(&mut self, other: TypesDb) {
        self.types.extend(other.types);
    }

    pub fn data_sources(&self, type_name: &str) -> Option<&[DataSource]> {
        self.types.get(type_name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn parse_source(line: usize, spec: &str) -> Result<DataSource, TypesDbError> {
    let malformed = || TypesDbError::MalformedSource {
        line,
        source_spec: spec.to_string(),
    };

    let mut fields = spec.split(':');
    let name = fields.next().ok_or_else(malformed)?;
    let kind = match fields.next().ok_or_else(malformed)? {
        "GAUGE" => DataSourceKind::Gauge,
        "COUNTER" => DataSourceKind::Counter,
        "DERIVE" => DataSourceKind::Derive,
        "ABSOLUTE" => DataSourceKind::Absolute,
        _ => return Err(malformed()),
    };
    let min = parse_bound(fields.next().ok_or_else(malformed)?).ok_or_else(malformed)?;
    let max = parse_bound(fields.next().ok_or_else(malformed)?).ok_or_else(malformed)?;
    if fields.next().is_some() || name.is_empty() {
        return Err(malformed());
    }

    Ok(DataSource {
        name: name.to_string(),
        kind,
        min,
        max,
    })
}

fn parse_bound(text: &str) -> Option<Option<f64>> {
    if text == "U" {
        return Some(None);
    }
    text.parse::<f64>().ok().map(Some)
}

/// Load and merge every types.db file under `path` (a file, or a directory
/// walked recursively). Unreadable or malformed files are logged and
/// skipped; the merge continues.
pub fn load(path: &Path) -> TypesDb {
    let mut db = TypesDb::default();
    merge_path(path, &mut db);
    db
}

fn merge_path(path: &Path, db: &mut TypesDb) {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) => {
            tracing::info!(path = %path.display(), %error, "skipping unreadable types db path");
            return;
        }
    };

    if metadata.is_dir() {
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::info!(path = %path.display(), %error, "skipping unreadable types db directory");
                return;
            }
        };
        // Deterministic merge order, so later-wins is stable.
        let mut paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
        paths.sort();
        for child in paths {
            merge_path(&child, db);
        }
        return;
    }

    tracing::info!(path = %path.display(), "loading types from file");
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(error) => {
            tracing::info!(path = %path.display(), %error, "unable to read collectd types file");
            return;
        }
    };
    match TypesDb::parse(&text) {
        Ok(parsed) => db.merge(parsed),
        Err(error) => {
            tracing::info!(path = %path.display(), %error, "unable to parse collectd types file");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_document() {
        let db = TypesDb::parse(
            "# comment\n\
             \n\
             df\t\tused:GAUGE:0:1125899906842623, free:GAUGE:0:1125899906842623\n\
             if_octets\trx:DERIVE:0:U, tx:DERIVE:0:U\n\
             load\t\tshortterm:GAUGE:0:5000, midterm:GAUGE:0:5000, longterm:GAUGE:0:5000\n",
        )
        .unwrap();

        assert_eq!(db.len(), 3);
        let df = db.data_sources("df").unwrap();
        assert_eq!(df.len(), 2);
        assert_eq!(df[0].name, "used");
        assert_eq!(df[0].kind, DataSourceKind::Gauge);
        assert_eq!(df[0].max, Some(1125899906842623.0));

        let rx = &db.data_sources("if_octets").unwrap()[0];
        assert_eq!(rx.kind, DataSourceKind::Derive);
        assert_eq!(rx.max, None);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert_eq!(
            TypesDb::parse("lonely\n").unwrap_err(),
            TypesDbError::MissingSources { line: 1 },
        );
        assert!(matches!(
            TypesDb::parse("t ds:BOGUS:0:U\n"),
            Err(TypesDbError::MalformedSource { line: 1, .. }),
        ));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut db = TypesDb::parse("df used:GAUGE:0:U, free:GAUGE:0:U\n").unwrap();
        db.merge(TypesDb::parse("df percent:GAUGE:0:100\n").unwrap());

        let df = db.data_sources("df").unwrap();
        assert_eq!(df.len(), 1);
        assert_eq!(df[0].name, "percent");
    }

    #[test]
    fn test_load_walks_directories_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();

        let mut good = std::fs::File::create(dir.path().join("a.db")).unwrap();
        writeln!(good, "df used:GAUGE:0:U, free:GAUGE:0:U").unwrap();
        let mut bad = std::fs::File::create(dir.path().join("b.db")).unwrap();
        writeln!(bad, "broken").unwrap();
        let mut deep = std::fs::File::create(nested.join("c.db")).unwrap();
        writeln!(deep, "load shortterm:GAUGE:0:5000, midterm:GAUGE:0:5000, longterm:GAUGE:0:5000").unwrap();

        let db = load(dir.path());
        assert_eq!(db.len(), 2);
        assert!(db.data_sources("df").is_some());
        assert!(db.data_sources("load").is_some());

        // A missing path yields an empty database rather than an error.
        assert!(load(&dir.path().join("missing")).is_empty());
    }
}
