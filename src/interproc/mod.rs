//! Interprocedural property databases.
//!
//! A database maps a method or field to an analysis-specific property. On disk
//! each entry is one `key|value` line, keys sorted, and only entries of
//! application classes are written. Reading is all-or-nothing: the first
//! malformed line fails the whole load.

pub(crate) mod propagation;
pub(crate) mod properties;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::errors::{DatabaseFormatError, DatabaseResult};
use crate::types::dotted_name;

const SEPARATOR: char = '|';

/// Value stored per member; opaque to the database apart from its text codec.
pub(crate) trait DatabaseProperty: Clone + fmt::Debug + PartialEq + Sized {
    fn encode(&self) -> String;

    fn decode(text: &str) -> Result<Self, String>;
}

/// Database key with a text codec and a declaring class.
pub(crate) trait DatabaseKey: Clone + fmt::Debug + Ord + Sized {
    /// Dotted name of the class the key belongs to.
    fn class_name(&self) -> &str;

    fn encode(&self) -> String;

    fn decode(text: &str) -> Result<Self, String>;
}

/// Identity of a method or field: declaring class, name, signature, access flags.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MemberKey {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) signature: String,
    pub(crate) access_flags: u32,
}

impl MemberKey {
    /// Accepts the class name in dotted or slashed form.
    pub(crate) fn new(class_name: &str, name: &str, signature: &str, access_flags: u32) -> Self {
        Self {
            class_name: dotted_name(class_name),
            name: name.to_string(),
            signature: signature.to_string(),
            access_flags,
        }
    }

    /// Same member ignoring access flags.
    pub(crate) fn same_member(&self, class_name: &str, name: &str, signature: &str) -> bool {
        self.class_name == dotted_name(class_name) && self.name == name && self.signature == signature
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.signature)
    }
}

impl DatabaseKey for MemberKey {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn encode(&self) -> String {
        format!(
            "{},{},{},{}",
            self.class_name, self.name, self.signature, self.access_flags
        )
    }

    fn decode(text: &str) -> Result<Self, String> {
        let fields: Vec<&str> = text.split(',').collect();
        let [class_name, name, signature, flags] = fields.as_slice() else {
            return Err(format!("expected 4 key fields, found {}", fields.len()));
        };
        if class_name.is_empty() || name.is_empty() || signature.is_empty() {
            return Err("empty key field".to_string());
        }
        let access_flags = flags
            .parse::<u32>()
            .map_err(|err| format!("invalid access flags {flags:?}: {err}"))?;
        Ok(Self::new(class_name, name, signature, access_flags))
    }
}

/// Key to property store with line-oriented persistence.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PropertyDatabase<K, P> {
    entries: BTreeMap<K, P>,
}

pub(crate) type MethodPropertyDatabase<P> = PropertyDatabase<MemberKey, P>;
pub(crate) type FieldPropertyDatabase<P> = PropertyDatabase<MemberKey, P>;

impl<K, P> Default for PropertyDatabase<K, P> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: DatabaseKey, P: DatabaseProperty> PropertyDatabase<K, P> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &K) -> Option<&P> {
        self.entries.get(key)
    }

    /// Store `property`, replacing and returning any previous one.
    pub(crate) fn set(&mut self, key: K, property: P) -> Option<P> {
        self.entries.insert(key, property)
    }

    pub(crate) fn remove(&mut self, key: &K) -> Option<P> {
        self.entries.remove(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &P)> {
        self.entries.iter()
    }

    /// Parse a whole database. Blank lines are skipped; any malformed line fails the read.
    pub(crate) fn read_from<R: BufRead>(reader: R) -> DatabaseResult<Self> {
        let mut entries = BTreeMap::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let content = line.trim_end_matches('\r');
            if content.trim().is_empty() {
                continue;
            }
            let format_error = |reason: String| DatabaseFormatError {
                line: index + 1,
                content: content.to_string(),
                reason,
            };
            let Some((key, value)) = content.split_once(SEPARATOR) else {
                return Err(format_error(format!("missing '{SEPARATOR}' separator")).into());
            };
            let key = K::decode(key).map_err(|reason| format_error(format!("bad key: {reason}")))?;
            let property =
                P::decode(value).map_err(|reason| format_error(format!("bad value: {reason}")))?;
            entries.insert(key, property);
        }
        Ok(Self { entries })
    }

    /// Write entries of classes accepted by `is_application`, one line each, sorted by encoded key.
    pub(crate) fn write_to<W, F>(&self, writer: &mut W, is_application: F) -> std::io::Result<usize>
    where
        W: Write,
        F: Fn(&str) -> bool,
    {
        let mut lines: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|(key, _)| is_application(key.class_name()))
            .map(|(key, property)| (key.encode(), property.encode()))
            .collect();
        lines.sort();
        for (key, value) in &lines {
            writeln!(writer, "{key}{SEPARATOR}{value}")?;
        }
        Ok(lines.len())
    }

    pub(crate) fn read_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::read_from(BufReader::new(file))
            .with_context(|| format!("failed to read {}", path.display()))
    }

    /// Read `path`, falling back to an empty database when it is missing or corrupt.
    pub(crate) fn load_or_empty(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::read_path(path) {
            Ok(database) => database,
            Err(err) => {
                warn!("ignoring property database {}: {err:#}", path.display());
                Self::new()
            }
        }
    }

    pub(crate) fn write_path<F>(&self, path: &Path, is_application: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let written = self
            .write_to(&mut writer, is_application)
            .with_context(|| format!("failed to write {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(written)
    }
}

impl<P: DatabaseProperty> PropertyDatabase<MemberKey, P> {
    /// Entry for a member regardless of the access flags it was recorded with.
    pub(crate) fn find_member(&self, class_name: &str, name: &str, signature: &str) -> Option<(&MemberKey, &P)> {
        let class_name = dotted_name(class_name);
        let start = MemberKey {
            class_name: class_name.clone(),
            name: name.to_string(),
            signature: signature.to_string(),
            access_flags: 0,
        };
        self.entries
            .range(start..)
            .next()
            .filter(|(key, _)| key.same_member(&class_name, name, signature))
    }
}

#[cfg(test)]
mod tests {
    use super::properties::ReturnNullness;
    use super::*;
    use crate::dataflow::null_set::NullnessValue;
    use crate::errors::DatabaseError;

    fn key(class_name: &str, name: &str) -> MemberKey {
        MemberKey::new(class_name, name, "()Ljava/lang/Object;", 1)
    }

    #[test]
    fn member_key_codec() {
        let key = MemberKey::new("com/example/A", "get", "(I)Ljava/lang/String;", 9);
        assert_eq!(key.encode(), "com.example.A,get,(I)Ljava/lang/String;,9");
        assert_eq!(MemberKey::decode(&key.encode()), Ok(key));
        assert!(MemberKey::decode("a.B,m,()V").is_err());
        assert!(MemberKey::decode("a.B,m,()V,x").is_err());
        assert!(MemberKey::decode("a.B,m,()V,1,2").is_err());
    }

    #[test]
    fn get_set_remove() {
        let mut database = MethodPropertyDatabase::new();
        let method = key("a/A", "m");
        assert!(database.set(method.clone(), ReturnNullness(NullnessValue::DefinitelyNotNull)).is_none());
        assert_eq!(
            database.set(method.clone(), ReturnNullness(NullnessValue::Unknown)),
            Some(ReturnNullness(NullnessValue::DefinitelyNotNull))
        );
        assert_eq!(database.get(&method), Some(&ReturnNullness(NullnessValue::Unknown)));
        assert!(database.find_member("a.A", "m", "()Ljava/lang/Object;").is_some());
        assert!(database.find_member("a.A", "n", "()Ljava/lang/Object;").is_none());
        assert!(database.remove(&method).is_some());
        assert!(database.is_empty());
    }

    #[test]
    fn writes_only_application_entries_sorted() {
        let mut database = MethodPropertyDatabase::new();
        database.set(key("b/B", "m"), ReturnNullness(NullnessValue::DefinitelyNull));
        database.set(key("a/A", "m"), ReturnNullness(NullnessValue::DefinitelyNotNull));
        database.set(key("lib/L", "m"), ReturnNullness(NullnessValue::DefinitelyNotNull));

        let mut output = Vec::new();
        let written = database
            .write_to(&mut output, |class_name| !class_name.starts_with("lib."))
            .expect("write");
        assert_eq!(written, 2);
        let text = String::from_utf8(output).expect("utf8");
        assert_eq!(
            text,
            "a.A,m,()Ljava/lang/Object;,1|nonnull\nb.B,m,()Ljava/lang/Object;,1|null\n"
        );

        let read: MethodPropertyDatabase<ReturnNullness> =
            PropertyDatabase::read_from(text.as_bytes()).expect("read");
        assert_eq!(read.len(), 2);
        assert_eq!(
            read.get(&key("a/A", "m")),
            Some(&ReturnNullness(NullnessValue::DefinitelyNotNull))
        );
        assert!(read.get(&key("lib/L", "m")).is_none());
    }

    #[test]
    fn malformed_line_fails_whole_read() {
        let text = "a.A,m,()V,1|nonnull\n\na.B,m,()V|nonnull\n";
        let result: DatabaseResult<MethodPropertyDatabase<ReturnNullness>> =
            PropertyDatabase::read_from(text.as_bytes());
        let Err(DatabaseError::Format(error)) = result else {
            panic!("expected format error");
        };
        assert_eq!(error.line, 3);
        assert_eq!(error.content, "a.B,m,()V|nonnull");
    }

    #[test]
    fn missing_separator_and_bad_value_are_rejected() {
        let missing: DatabaseResult<MethodPropertyDatabase<ReturnNullness>> =
            PropertyDatabase::read_from("a.A,m,()V,1 nonnull\n".as_bytes());
        assert!(matches!(missing, Err(DatabaseError::Format(ref error)) if error.line == 1));

        let bad_value: DatabaseResult<MethodPropertyDatabase<ReturnNullness>> =
            PropertyDatabase::read_from("a.A,m,()V,1|maybe\n".as_bytes());
        assert!(matches!(bad_value, Err(DatabaseError::Format(_))));
    }

    #[test]
    fn corrupt_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("methods.db");
        std::fs::write(&path, "garbage\n").expect("write db");
        let database: MethodPropertyDatabase<ReturnNullness> = PropertyDatabase::load_or_empty(&path);
        assert!(database.is_empty());
        assert!(PropertyDatabase::<MemberKey, ReturnNullness>::read_path(&path).is_err());
    }

    #[test]
    fn path_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("methods.db");
        let mut database = MethodPropertyDatabase::new();
        database.set(key("a/A", "m"), ReturnNullness(NullnessValue::DefinitelyNotNull));
        database.write_path(&path, |_| true).expect("write db");
        let read: MethodPropertyDatabase<ReturnNullness> =
            PropertyDatabase::read_path(&path).expect("read db");
        assert_eq!(read, database);
    }
}
