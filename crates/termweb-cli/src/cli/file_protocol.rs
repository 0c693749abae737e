//! Built-in `file:` protocol handler.
//!
//! Local reads never block for long, so the whole file is streamed into the
//! cache from within `start`, resuming at the connection's offset.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use termweb_core::scheduler::{ConnId, ConnectPhase, ConnectionState, ProtocolHandler};
use termweb_core::{ConnError, Engine};

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Debug, Default)]
pub struct FileHandler;

impl FileHandler {
    fn stream(engine: &mut Engine, conn: ConnId, file: &mut File) -> Result<(), ConnError> {
        let from = engine.connection(conn).map_or(0, |c| c.from());
        let len = file.metadata().map_err(io_error)?.len();
        engine.set_est_length(conn, Some(len));
        engine.connection_cache_entry(conn)?;
        file.seek(SeekFrom::Start(from)).map_err(io_error)?;
        engine.set_state(conn, ConnectionState::Connecting(ConnectPhase::Processing));

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(e)),
            };
            engine.receive(conn, &buf[..n])?;
        }
    }
}

fn io_error(e: io::Error) -> ConnError {
    ConnError::Transport(e.to_string())
}

impl ProtocolHandler for FileHandler {
    fn start(&self, engine: &mut Engine, conn: ConnId) {
        let Some(path) = engine
            .connection(conn)
            .and_then(|c| c.uri().url().to_file_path().ok())
        else {
            engine.abort(conn, Err(ConnError::BadUrl));
            return;
        };

        let result = File::open(&path)
            .map_err(io_error)
            .and_then(|mut file| Self::stream(engine, conn, &mut file));
        if let Err(e) = &result {
            tracing::info!(path = %path.display(), error = %e, "file load failed");
        }
        engine.abort(conn, result);
    }
}
