use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{MirrorError, MirrorResult};
use crate::query::{self, Filters, QueryDescriptor};
use crate::schema::{Row, KEY_FIELD};

pub const ROWS_CF: &str = "rows";
const ROW_PREFIX: &str = "row:";

/// Durable mirror of replicated rows, one entry per Row Key.
///
/// Reads are full scans in key order; the local adapter relies on that order
/// as the stable tie-break for sorting.
pub struct LocalStore {
    db: DB,
    path: PathBuf,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.path)
            .finish()
    }
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(data_dir: P) -> MirrorResult<Self> {
        let path = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(5);

        let mut cf_names = match DB::list_cf(&opts, &path) {
            Ok(cfs) => cfs,
            Err(_) => vec!["default".to_string()],
        };
        if !cf_names.iter().any(|name| name == ROWS_CF) {
            cf_names.push(ROWS_CF.to_string());
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors).map_err(|e| {
            MirrorError::SourceUnavailable(format!("failed to open local store: {}", e))
        })?;

        tracing::info!("Opened local store at {:?}", path);
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cf(&self) -> MirrorResult<&rocksdb::ColumnFamily> {
        self.db.cf_handle(ROWS_CF).ok_or_else(|| {
            MirrorError::SourceUnavailable(format!("column family {} missing", ROWS_CF))
        })
    }

    fn entry_key(row_key: &str) -> Vec<u8> {
        format!("{}{}", ROW_PREFIX, row_key).into_bytes()
    }

    /// Remove every stored row.
    pub fn clear(&self) -> MirrorResult<usize> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for item in self.db.prefix_iterator_cf(cf, ROW_PREFIX.as_bytes()) {
            let (key, _) = item?;
            if !key.starts_with(ROW_PREFIX.as_bytes()) {
                break;
            }
            batch.delete_cf(cf, key);
            removed += 1;
        }

        self.db.write(batch)?;
        tracing::debug!("Cleared {} rows from local store", removed);
        Ok(removed)
    }

    /// Write rows under their Row Keys, last write wins.
    ///
    /// `first_ordinal` is the stream position of `rows[0]`; it only matters for
    /// rows that fall back to the composite key.
    pub fn upsert(&self, rows: &[Row], first_ordinal: u64) -> MirrorResult<usize> {
        let cf = self.cf()?;
        let mut batch = WriteBatch::default();

        for (index, row) in rows.iter().enumerate() {
            let row_key = row.row_key(first_ordinal + index as u64);
            let mut doc = row.as_map().clone();
            doc.insert(KEY_FIELD.to_string(), Value::String(row_key.clone()));
            let bytes = serde_json::to_vec(&doc)?;
            batch.put_cf(cf, Self::entry_key(&row_key), bytes);
        }

        self.db.write(batch)?;
        Ok(rows.len())
    }

    pub fn get(&self, row_key: &str) -> MirrorResult<Option<Row>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, Self::entry_key(row_key))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored row in key order. Entries that fail to decode are skipped.
    pub fn scan(&self) -> MirrorResult<Vec<Row>> {
        let cf = self.cf()?;
        let mut rows = Vec::new();

        for item in self.db.prefix_iterator_cf(cf, ROW_PREFIX.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(ROW_PREFIX.as_bytes()) {
                break;
            }
            match serde_json::from_slice::<Row>(&value) {
                Ok(row) => rows.push(row),
                Err(e) => tracing::warn!(
                    "Skipping undecodable row {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }

        Ok(rows)
    }

    pub fn len(&self) -> MirrorResult<usize> {
        let cf = self.cf()?;
        let mut n = 0;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if key.starts_with(ROW_PREFIX.as_bytes()) {
                n += 1;
            }
        }
        Ok(n)
    }

    pub fn is_empty(&self) -> MirrorResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn count(&self, filters: &Filters) -> MirrorResult<u64> {
        let rows = self.scan()?;
        Ok(rows.iter().filter(|row| filters.matches(row)).count() as u64)
    }

    /// Full scan, filter, stable sort, slice.
    pub fn fetch_page(&self, descriptor: &QueryDescriptor) -> MirrorResult<Vec<Row>> {
        let (_, page) = query::apply(self.scan()?, descriptor);
        Ok(page)
    }

    pub fn flush(&self) -> MirrorResult<()> {
        let cf = self.cf()?;
        self.db.flush_cf(cf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use tempfile::TempDir;

    fn person(company: &str, first: &str, last: &str) -> Row {
        Row::new()
            .with(Column::CompanyName, company)
            .with(Column::FirstName, first)
            .with(Column::LastName, last)
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let rows = vec![
            Row::new().with(Column::Id, 1).with(Column::CompanyName, "Acme"),
            Row::new().with(Column::Email, "ada@acme.test"),
        ];

        store.upsert(&rows, 0).unwrap();
        store.upsert(&rows, 0).unwrap();
        assert_eq!(store.len().unwrap(), 2);

        let stored = store.get("id:1").unwrap().unwrap();
        assert_eq!(stored.text(Column::CompanyName).as_deref(), Some("Acme"));
        assert!(stored.get_field(KEY_FIELD).is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store
            .upsert(&[Row::new().with(Column::Id, 7).with(Column::City, "Oslo")], 0)
            .unwrap();
        store
            .upsert(&[Row::new().with(Column::Id, 7).with(Column::City, "Bergen")], 0)
            .unwrap();

        assert_eq!(store.len().unwrap(), 1);
        let row = store.get("id:7").unwrap().unwrap();
        assert_eq!(row.text(Column::City).as_deref(), Some("Bergen"));
    }

    #[test]
    fn test_composite_keys_use_stream_ordinal() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let twin = person("Acme", "Ada", "Lovelace");

        store.upsert(&[twin.clone(), twin.clone()], 0).unwrap();
        store.upsert(&[twin.clone()], 2).unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert!(store.get("row:Acme|Ada|Lovelace|2").unwrap().is_some());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store
            .upsert(&[person("A", "b", "c"), person("D", "e", "f")], 0)
            .unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.is_empty().unwrap());
        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = LocalStore::open(dir.path()).unwrap();
            store.upsert(&[person("Acme", "Ada", "L")], 0).unwrap();
            store.flush().unwrap();
        }
        let store = LocalStore::open(dir.path()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_count_and_fetch_page() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let rows: Vec<Row> = (0..12)
            .map(|i| {
                Row::new()
                    .with(Column::Id, i)
                    .with(Column::CompanyName, if i % 2 == 0 { "Acme" } else { "Zeta" })
                    .with(Column::Employees, 100 - i)
            })
            .collect();
        store.upsert(&rows, 0).unwrap();

        let filters = Filters::new().with(Column::CompanyName, "ACME");
        assert_eq!(store.count(&filters).unwrap(), 6);

        let d = QueryDescriptor::new()
            .with_filters(filters)
            .with_sort(Column::Employees, crate::query::SortDirection::Asc)
            .with_page_size(4)
            .with_page(2);
        let page = store.fetch_page(&d).unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.text(Column::Id).unwrap()).collect();
        assert_eq!(ids, vec!["2", "0"]);
    }

    #[test]
    fn test_skips_undecodable_entries() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store.upsert(&[person("Acme", "Ada", "L")], 0).unwrap();
        let cf = store.cf().unwrap();
        store.db.put_cf(cf, b"row:garbage", b"not json").unwrap();

        assert_eq!(store.scan().unwrap().len(), 1);
        assert_eq!(store.len().unwrap(), 2);
    }
}
