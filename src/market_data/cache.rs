// src/market_data/cache.rs
// File-backed read-through bar cache, one CSV per symbol
// (date,open,high,low,close,volume), plus the process-level advisory lock
// that serializes runs against the same cache directory.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use rust_decimal::Decimal;

use super::{Bar, PriceHistory};
use crate::error::EngineError;

const LOCK_FILE: &str = ".whitelight.lock";

pub struct BarCache {
    dir: PathBuf,
}

impl BarCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, EngineError> {
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Cache(format!("cannot create cache dir: {}", e)))?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", symbol))
    }

    /// Acquire the advisory lock for the duration of a run. Fails fast when
    /// another run holds it.
    pub fn lock(&self) -> Result<CacheLock, EngineError> {
        let path = self.dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                EngineError::Cache(format!(
                    "cache is locked by another run ({}): {}",
                    path.display(),
                    e
                ))
            })?;
        let _ = writeln!(file, "{}", std::process::id());
        Ok(CacheLock { path })
    }

    /// Load a symbol's history; a missing file is an empty history.
    pub fn load(&self, symbol: &str) -> Result<PriceHistory, EngineError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(PriceHistory::default());
        }
        let file = File::open(&path)
            .map_err(|e| EngineError::Cache(format!("cannot open {}: {}", path.display(), e)))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut bars = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| EngineError::Cache(format!("bad row in {}: {}", symbol, e)))?;
            if record.len() < 6 {
                continue; // Skip short rows
            }
            let date: NaiveDate = record[0]
                .parse()
                .map_err(|e| EngineError::Cache(format!("bad date '{}': {}", &record[0], e)))?;
            let parse_px = |i: usize| -> Result<Decimal, EngineError> {
                record[i]
                    .parse()
                    .map_err(|e| EngineError::Cache(format!("bad price '{}': {}", &record[i], e)))
            };
            let volume: u64 = record[5].parse().unwrap_or(0);
            bars.push(Bar {
                date,
                open: parse_px(1)?,
                high: parse_px(2)?,
                low: parse_px(3)?,
                close: parse_px(4)?,
                volume,
            });
        }
        PriceHistory::new(bars)
    }

    /// Persist a symbol's full history, newest last.
    pub fn store(&self, symbol: &str, history: &PriceHistory) -> Result<(), EngineError> {
        let path = self.path_for(symbol);
        let file = File::create(&path)
            .map_err(|e| EngineError::Cache(format!("cannot write {}: {}", path.display(), e)))?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        writer
            .write_record(["date", "open", "high", "low", "close", "volume"])
            .map_err(|e| EngineError::Cache(e.to_string()))?;
        for bar in history.bars() {
            writer
                .write_record([
                    bar.date.to_string(),
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume.to_string(),
                ])
                .map_err(|e| EngineError::Cache(e.to_string()))?;
        }
        writer.flush().map_err(|e| EngineError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Merge freshly fetched bars into the cached history and persist.
    pub fn append(&self, symbol: &str, bars: Vec<Bar>) -> Result<PriceHistory, EngineError> {
        let mut history = self.load(symbol)?;
        history.merge(bars);
        self.store(symbol, &history)?;
        Ok(history)
    }

    pub fn latest_date(&self, symbol: &str) -> Result<Option<NaiveDate>, EngineError> {
        Ok(self.load(symbol)?.latest_date())
    }
}

/// RAII advisory lock; releases on drop.
pub struct CacheLock {
    path: PathBuf,
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: &str) -> Bar {
        Bar {
            date: date.parse().unwrap(),
            open: close.parse().unwrap(),
            high: close.parse().unwrap(),
            low: close.parse().unwrap(),
            close: close.parse().unwrap(),
            volume: 100,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let history = PriceHistory::new(vec![
            bar("2024-01-02", "101.25000000"),
            bar("2024-01-03", "102.50000000"),
        ])
        .unwrap();
        cache.store("TQQQ", &history).unwrap();

        let loaded = cache.load("TQQQ").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.bars()[1].close, "102.5".parse().unwrap());
        assert_eq!(
            cache.latest_date("TQQQ").unwrap(),
            Some("2024-01-03".parse().unwrap())
        );
    }

    #[test]
    fn test_missing_symbol_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        assert!(cache.load("SQQQ").unwrap().is_empty());
    }

    #[test]
    fn test_append_merges_delta() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        cache
            .store(
                "BIL",
                &PriceHistory::new(vec![bar("2024-01-02", "91.40")]).unwrap(),
            )
            .unwrap();
        let merged = cache
            .append("BIL", vec![bar("2024-01-03", "91.41")])
            .unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(cache.load("BIL").unwrap().len(), 2);
    }

    #[test]
    fn test_lock_excludes_second_run() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BarCache::new(dir.path()).unwrap();
        let guard = cache.lock().unwrap();
        assert!(cache.lock().is_err());
        drop(guard);
        assert!(cache.lock().is_ok());
    }
}
