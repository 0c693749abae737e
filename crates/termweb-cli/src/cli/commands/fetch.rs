//! `termweb fetch <target>...` – load local files through the engine.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use termweb_core::cache::CacheMode;
use termweb_core::config::EngineConfig;
use termweb_core::scheduler::{ConnectionState, DownloadId, Priority};
use termweb_core::{Engine, Uri};
use url::Url;

use crate::cli::file_protocol::FileHandler;

#[derive(Debug, Serialize)]
struct FetchResult {
    target: String,
    uri: String,
    status: String,
    bytes: Option<u64>,
    complete: bool,
}

#[derive(Debug, Serialize)]
struct FetchReport {
    results: Vec<FetchResult>,
    cache_entries: usize,
    cache_bytes: u64,
}

/// Accept `file:` URLs as-is and turn anything else into an absolute file URL.
pub(crate) fn target_uri(target: &str) -> Result<Uri> {
    if let Ok(url) = Url::parse(target) {
        if url.scheme().len() > 1 {
            return Ok(Uri::from_url(url));
        }
    }
    let path = std::fs::canonicalize(Path::new(target))
        .with_context(|| format!("resolve path {target}"))?;
    let url = Url::from_file_path(&path)
        .map_err(|_| anyhow!("cannot express {} as a file URL", path.display()))?;
    Ok(Uri::from_url(url))
}

fn status_of(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Done(Ok(())) => "ok".to_string(),
        ConnectionState::Done(Err(e)) => e.to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

/// Drive the engine until every connection has finished.
fn run_until_idle(engine: &mut Engine) {
    loop {
        engine.tick();
        for event in engine.poll_events() {
            tracing::debug!(download = %event.download, state = ?event.state, "download event");
        }
        if engine.connections_count() == 0 && !engine.has_pending_work() {
            return;
        }
        if engine.has_pending_work() {
            continue;
        }
        match engine.next_deadline() {
            Some(at) => std::thread::sleep(at.saturating_duration_since(Instant::now())),
            None => {
                tracing::error!(
                    connections = engine.connections_count(),
                    "connections left with nothing to wait for"
                );
                return;
            }
        }
    }
}

pub fn run_fetch(cfg: &EngineConfig, targets: &[String], json: bool) -> Result<()> {
    let mut engine = Engine::new(cfg.clone());
    engine.register_handler("file", Rc::new(FileHandler));

    let mut requests: Vec<(String, Result<(Uri, DownloadId)>)> = Vec::new();
    for target in targets {
        let request = target_uri(target).and_then(|uri| {
            let download = engine.create_download();
            engine.load_uri(&uri, None, Some(download), Priority::Main, CacheMode::Normal, 0)?;
            Ok((uri, download))
        });
        requests.push((target.clone(), request));
    }

    run_until_idle(&mut engine);

    let results = requests
        .into_iter()
        .map(|(target, request)| match request {
            Ok((uri, download)) => {
                let d = engine.download(download);
                let entry = d
                    .and_then(|d| d.cached())
                    .and_then(|id| engine.cache().get(id));
                FetchResult {
                    target,
                    uri: uri.to_string(),
                    status: d.map_or_else(|| "lost".to_string(), |d| status_of(d.state())),
                    bytes: entry.map(|e| e.length()),
                    complete: entry.is_some_and(|e| !e.is_incomplete()),
                }
            }
            Err(e) => FetchResult {
                target,
                uri: String::new(),
                status: format!("{e:#}"),
                bytes: None,
                complete: false,
            },
        })
        .collect();

    let report = FetchReport {
        results,
        cache_entries: engine.cache_entry_count(),
        cache_bytes: engine.cache_size(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:<10} {:<10} {}", "STATUS", "BYTES", "URI");
        for r in &report.results {
            let bytes = r
                .bytes
                .map(|b| format!("{b}"))
                .unwrap_or_else(|| "-".to_string());
            let uri = if r.uri.is_empty() { &r.target } else { &r.uri };
            println!("{:<10} {:<10} {}", r.status, bytes, uri);
        }
        println!(
            "cache: {} entries, {} bytes",
            report.cache_entries, report.cache_bytes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_paths_become_file_urls() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hi").unwrap();
        let uri = target_uri(file.path().to_str().unwrap()).unwrap();
        assert_eq!(uri.scheme(), "file");
    }

    #[test]
    fn file_urls_are_kept() {
        let uri = target_uri("file:///etc/hostname").unwrap();
        assert_eq!(uri.to_string(), "file:///etc/hostname");
    }

    #[test]
    fn missing_paths_are_errors() {
        assert!(target_uri("/definitely/not/here/termweb").is_err());
    }

    #[test]
    fn local_files_end_up_complete_in_the_cache() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let body = vec![b'z'; 40_000];
        file.write_all(&body).unwrap();

        let mut engine = Engine::new(EngineConfig::default());
        engine.register_handler("file", Rc::new(FileHandler));
        let uri = target_uri(file.path().to_str().unwrap()).unwrap();
        let d = engine.create_download();
        engine
            .load_uri(&uri, None, Some(d), Priority::Main, CacheMode::Normal, 0)
            .unwrap();
        run_until_idle(&mut engine);

        let download = engine.download(d).unwrap();
        assert_eq!(download.state(), &ConnectionState::Done(Ok(())));
        let entry = engine.cache().get(download.cached().unwrap()).unwrap();
        assert_eq!(entry.length(), 40_000);
        assert!(!entry.is_incomplete());
        assert_eq!(engine.cache_size(), 40_000);
    }

    #[test]
    fn unreadable_files_report_an_error() {
        let mut engine = Engine::new(EngineConfig::default());
        engine.register_handler("file", Rc::new(FileHandler));
        let uri = Uri::parse("file:///definitely/not/here/termweb").unwrap();
        let d = engine.create_download();
        engine
            .load_uri(&uri, None, Some(d), Priority::Main, CacheMode::Normal, 0)
            .unwrap();
        run_until_idle(&mut engine);

        let state = engine.download(d).unwrap().state().clone();
        assert!(matches!(state, ConnectionState::Done(Err(_))));
        assert_eq!(engine.connections_count(), 0);
    }
}
