use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::{mime_for_extension, Frame, FrameSource, SourceError};

/// Replays a directory of encoded stills in file-name order, looping.
///
/// Each capture re-reads the file, so stills can be swapped while the
/// session runs. A file that cannot be read yields `None` for that tick.
pub struct StillImageSource {
    stills: Vec<(PathBuf, &'static str)>,
    cursor: usize,
}

impl StillImageSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SourceError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Directory {
            path: dir.display().to_string(),
            source,
        })?;

        let mut stills: Vec<(PathBuf, &'static str)> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let mime = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(mime_for_extension)?;
                Some((path, mime))
            })
            .collect();
        stills.sort_by(|a, b| a.0.cmp(&b.0));

        if stills.is_empty() {
            return Err(SourceError::NoStills(dir.display().to_string()));
        }
        debug!(
            target = "caretaker::capture",
            dir = %dir.display(),
            count = stills.len(),
            "loaded still frames"
        );
        Ok(Self { stills, cursor: 0 })
    }

    pub fn len(&self) -> usize {
        self.stills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stills.is_empty()
    }
}

impl FrameSource for StillImageSource {
    fn capture(&mut self) -> Option<Frame> {
        let (path, mime) = self.stills.get(self.cursor).map(|(p, m)| (p, *m))?;
        self.cursor = (self.cursor + 1) % self.stills.len();
        match std::fs::read(path) {
            Ok(data) if !data.is_empty() => Some(Frame {
                data: Bytes::from(data),
                mime,
                captured_at: SystemTime::now(),
            }),
            Ok(_) => None,
            Err(err) => {
                warn!(
                    target = "caretaker::capture",
                    path = %path.display(),
                    error = %err,
                    "still frame unreadable; skipping tick"
                );
                None
            }
        }
    }
}
