//! Terminal handler serving files from a root directory.
//!
//! Resolution for a request path: join it under the root (the codec already
//! rejected traversal, and only plain path components are appended here),
//! stat, then
//!
//! - a file is read whole and served with a MIME type from its extension
//! - a directory serves its `index.gmi`, or a generated listing when
//!   autoindex is on, or `51` when it is off
//! - anything that cannot be served answers `51` with the cause as META

use std::io;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use tokio::fs;

use crate::error::{GeminiError, StatusError};
use crate::handler::{BoxFuture, Handler};
use crate::request::Request;
use crate::response::ResponseWriter;
use crate::status::Status;
use crate::{GEMINI_MIME, INDEX_FILE};

/// File-serving handler: the end of every middleware chain.
pub struct Files {
    root: PathBuf,
    autoindex: bool,
}

impl Files {
    /// Serves documents under `root`. With `autoindex`, directories lacking
    /// an `index.gmi` get a generated listing instead of `51`.
    pub fn new(root: impl Into<PathBuf>, autoindex: bool) -> Self {
        Self { root: root.into(), autoindex }
    }

    async fn respond(&self, path: &str) -> Result<(String, Bytes), StatusError> {
        let full = join_under_root(&self.root, path);

        let meta = fs::metadata(&full)
            .await
            .map_err(|e| StatusError::new(Status::NotFound, e))?;

        if !meta.is_dir() {
            return read_file(&full).await;
        }

        let index = full.join(INDEX_FILE);
        if fs::metadata(&index).await.is_ok() {
            read_file(&index).await
        } else if self.autoindex {
            list_directory(&full, path).await
        } else {
            Err(StatusError::new(Status::NotFound, GeminiError::DirWithoutIndex))
        }
    }
}

impl Handler for Files {
    fn serve<'a>(
        &'a self,
        w: &'a mut dyn ResponseWriter,
        req: &'a Request,
    ) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            match self.respond(req.path()).await {
                Ok((mime, body)) => {
                    w.write_header(Status::Success, &mime).await?;
                    w.write_body(&body).await
                }
                Err(e) => {
                    let meta = e.meta();
                    w.write_header(e.status(), &meta).await
                }
            }
        })
    }
}

/// Joins the request path under the root. Only plain components are
/// appended, so the result cannot leave the root whatever the input.
fn join_under_root(root: &Path, request_path: &str) -> PathBuf {
    let mut full = root.to_path_buf();
    for component in Path::new(request_path).components() {
        if let Component::Normal(part) = component {
            full.push(part);
        }
    }
    full
}

async fn read_file(path: &Path) -> Result<(String, Bytes), StatusError> {
    // MIME first: an unservable type should not cost a disk read.
    let mime = mime_for(path)
        .ok_or_else(|| StatusError::new(Status::NotFound, GeminiError::UnsupportedFileType))?;

    let data = fs::read(path)
        .await
        .map_err(|e| StatusError::new(Status::NotFound, e))?;

    Ok((mime, Bytes::from(data)))
}

fn mime_for(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) == Some("gmi") {
        return Some(GEMINI_MIME.to_owned());
    }
    mime_guess::from_path(path).first_raw().map(str::to_owned)
}

/// Renders a gemtext listing of `full`. Entries are sorted so the same
/// directory always renders the same bytes.
async fn list_directory(full: &Path, relpath: &str) -> Result<(String, Bytes), StatusError> {
    let mut entries = fs::read_dir(full)
        .await
        .map_err(|e| StatusError::new(Status::NotFound, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StatusError::new(Status::NotFound, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();

    let mut out = String::new();
    if relpath == "/" {
        out.push_str("Index of /\n\n");
        for name in &names {
            out.push_str(&format!("=> {name}\n"));
        }
    } else {
        let idx = relpath.trim_end_matches('/');
        let parent = Path::new(idx)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_owned());

        out.push_str(&format!("Index of {idx}/\n\n"));
        out.push_str(&format!("=> {parent} ..\n"));
        for name in &names {
            out.push_str(&format!("=> {idx}/{name} {name}\n"));
        }
    }

    Ok((GEMINI_MIME.to_owned(), Bytes::from(out)))
}
