//! File driver: scheduled scans of a directory with per-file offset
//! tracking for incremental tailing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use hubd_catalog::model::DataSource;
use hubd_core::{HubError, HubResult, Row};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::{FileConfig, FileFormat};
use crate::driver::{Capability, Driver, DriverStats, FetchParams, HealthProbe, RowStream, StatsCell};

const CHANNEL_CAPACITY: usize = 256;

pub struct FileDriver {
    source_id: String,
    config: FileConfig,
    /// Byte offset already consumed per file (incremental mode).
    offsets: Arc<DashMap<PathBuf, u64>>,
    stats: Arc<StatsCell>,
}

impl FileDriver {
    pub fn new(source: &DataSource) -> HubResult<Self> {
        Ok(Self {
            source_id: source.id.clone(),
            config: FileConfig::from_config(&source.connection_config)?,
            offsets: Arc::new(DashMap::new()),
            stats: StatsCell::new(),
        })
    }

    async fn matching_files(&self) -> HubResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.config.directory)
            .await
            .map_err(|e| HubError::driver_with("directory scan failed", e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| HubError::driver_with("directory scan failed", e))?
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern_matches(&self.config.pattern, &name) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Filename match with a single optional `*` wildcard.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == name,
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
    }
}

fn parse_delimited(header: &[String], line: &str, delimiter: char) -> Row {
    let mut row = Row::new();
    for (index, value) in line.split(delimiter).enumerate() {
        let key = header
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("column_{index}"));
        let trimmed = value.trim();
        let parsed = if let Ok(n) = trimmed.parse::<i64>() {
            serde_json::Value::from(n)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            serde_json::Value::from(f)
        } else {
            serde_json::Value::from(trimmed)
        };
        row.insert(key, parsed);
    }
    row
}

#[async_trait]
impl Driver for FileDriver {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn type_name(&self) -> &str {
        "file"
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::Fetch)
    }

    async fn health_check(&self) -> HealthProbe {
        let started = Instant::now();
        let result = tokio::fs::metadata(&self.config.directory).await;
        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(meta) if meta.is_dir() => {
                self.stats.touch_ok();
                HealthProbe::up(latency)
            }
            Ok(_) => HealthProbe::down(latency, "path is not a directory"),
            Err(e) => {
                self.stats.record_error();
                HealthProbe::down(latency, e.to_string())
            }
        }
    }

    async fn fetch(&self, params: FetchParams, cancel: CancellationToken) -> HubResult<RowStream> {
        self.stats.record_fetch();
        let files = self.matching_files().await?;
        let config = self.config.clone();
        let offsets = self.offsets.clone();
        let stats = self.stats.clone();
        let max_rows = params.max_rows();

        let (tx, rx) = tokio::sync::mpsc::channel::<HubResult<Row>>(CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut sent = 0u64;
            'files: for path in files {
                if cancel.is_cancelled() {
                    break;
                }
                let start_offset = if config.incremental {
                    offsets.get(&path).map(|o| *o).unwrap_or(0)
                } else {
                    0
                };
                match read_file_rows(&path, &config, start_offset).await {
                    Ok((rows, end_offset)) => {
                        for row in rows {
                            if cancel.is_cancelled() {
                                break 'files;
                            }
                            sent += 1;
                            if tx.send(Ok(row)).await.is_err() {
                                break 'files;
                            }
                            if max_rows.map(|max| sent >= max).unwrap_or(false) {
                                offsets.insert(path.clone(), end_offset);
                                break 'files;
                            }
                        }
                        offsets.insert(path.clone(), end_offset);
                        stats.touch_ok();
                    }
                    Err(e) => {
                        stats.record_error();
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn stats(&self) -> DriverStats {
        self.stats.snapshot(None)
    }
}

/// Read rows appended after `start_offset`; returns the new end offset.
async fn read_file_rows(
    path: &Path,
    config: &FileConfig,
    start_offset: u64,
) -> HubResult<(Vec<Row>, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| HubError::driver_with(format!("open {path:?} failed"), e))?;
    let mut reader = BufReader::new(file);

    let header = match config.format {
        FileFormat::Delimited(delimiter) => {
            let mut first = String::new();
            reader
                .read_line(&mut first)
                .await
                .map_err(|e| HubError::driver_with("read failed", e))?;
            Some(
                first
                    .trim_end()
                    .split(delimiter)
                    .map(|s| s.trim().to_string())
                    .collect::<Vec<_>>(),
            )
        }
        FileFormat::JsonLines => None,
    };

    let header_end = reader
        .stream_position()
        .await
        .map_err(|e| HubError::driver_with("seek failed", e))?;
    let resume_at = start_offset.max(header_end);
    reader
        .seek(std::io::SeekFrom::Start(resume_at))
        .await
        .map_err(|e| HubError::driver_with("seek failed", e))?;

    let mut rows = Vec::new();
    let mut offset = resume_at;
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| HubError::driver_with("read failed", e))?;
        if read == 0 {
            break;
        }
        offset += read as u64;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        match config.format {
            FileFormat::JsonLines => match serde_json::from_str::<serde_json::Value>(trimmed) {
                Ok(serde_json::Value::Object(map)) => rows.push(map),
                Ok(other) => {
                    let mut map = Row::new();
                    map.insert("payload".into(), other);
                    rows.push(map);
                }
                Err(e) => {
                    return Err(HubError::driver(format!(
                        "invalid JSON line in {path:?}: {e}"
                    )))
                }
            },
            FileFormat::Delimited(delimiter) => {
                rows.push(parse_delimited(
                    header.as_deref().unwrap_or(&[]),
                    trimmed,
                    delimiter,
                ));
            }
        }
    }
    Ok((rows, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubd_catalog::model::{ResourceStatus, SourceCategory};

    fn source(dir: &Path, format: &str) -> DataSource {
        DataSource {
            id: "file-1".into(),
            library_id: "lib".into(),
            name: "drop folder".into(),
            category: SourceCategory::File,
            source_type: "file".into(),
            connection_config: serde_json::json!({
                "directory": dir.to_string_lossy(),
                "pattern": "*.log",
                "format": format,
            }),
            params_config: serde_json::json!({}),
            script: None,
            script_enabled: false,
            status: ResourceStatus::Active,
            is_resident: false,
            created_at: chrono::Utc::now(),
        }
    }

    async fn collect(stream: RowStream) -> Vec<Row> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn pattern_matching() {
        assert!(pattern_matches("*", "anything.log"));
        assert!(pattern_matches("*.log", "a.log"));
        assert!(pattern_matches("app_*", "app_2024"));
        assert!(!pattern_matches("*.log", "a.txt"));
        assert!(!pattern_matches("exact", "other"));
    }

    #[tokio::test]
    async fn jsonl_incremental_reads_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.log");
        std::fs::write(&path, "{\"v\":1}\n{\"v\":2}\n").unwrap();

        let driver = FileDriver::new(&source(dir.path(), "jsonl")).unwrap();
        let rows = collect(
            driver
                .fetch(FetchParams::default(), CancellationToken::new())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["v"], 2);

        // Append and fetch again: only the new line comes back.
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"v\":3}\n");
        std::fs::write(&path, content).unwrap();
        let rows = collect(
            driver
                .fetch(FetchParams::default(), CancellationToken::new())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["v"], 3);
    }

    #[tokio::test]
    async fn csv_header_projection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.log"), "id,amt\n1,9.5\n2,3\n").unwrap();
        let driver = FileDriver::new(&source(dir.path(), "csv")).unwrap();
        let rows = collect(
            driver
                .fetch(FetchParams::default(), CancellationToken::new())
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[0]["amt"], 9.5);
    }
}
