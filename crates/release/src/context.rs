//! Build-context tar production.
//!
//! Streams the cloned worktree as a GNU tar into an in-process pipe while
//! the builder consumes the other end, followed by the generated Dockerfile
//! under the injected service path. Nothing is buffered beyond the pipe
//! window.

use std::{
    io::Write,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tar::{Builder, EntryType, Header};
use tokio::io::{duplex, DuplexStream};
use tokio_util::io::SyncIoBridge;

use crate::{dockerfile::SERVICE_DOCKERFILE_IN_CONTEXT_TAR, traits::GitRepo};

/// Window of the in-process pipe between the context writer and the
/// builder.
const CONTEXT_PIPE_CAPACITY: usize = 64 * 1024;

/// Spawns the context tar producer on a blocking thread.
///
/// Returns the read end to hand to the builder and the producer's join
/// handle; the handle resolves to the producer's own error if writing
/// failed, which the job reports in preference to whatever the downstream
/// stages saw.
pub fn spawn_context_tar(
    repo: Arc<dyn GitRepo>,
    dockerfile: Vec<u8>,
) -> (DuplexStream, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let (read_half, write_half) = duplex(CONTEXT_PIPE_CAPACITY);
    let bridge = SyncIoBridge::new(write_half);

    let handle = tokio::task::spawn_blocking(move || {
        write_context_tar(bridge, repo.as_ref(), &dockerfile)
    });

    (read_half, handle)
}

/// Writes the worktree and the injected Dockerfile as a GNU tar.
///
/// Symlinks are recorded with `size = 0` and their target in the linkname
/// field; regular files carry their content with the worktree mode.
/// Timestamps are the build wall clock.
fn write_context_tar(
    out: impl Write,
    repo: &dyn GitRepo,
    dockerfile: &[u8],
) -> anyhow::Result<()> {
    let mut builder = Builder::new(out);
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

    repo.for_each_worktree_entry(&mut |entry| {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(now);

        match &entry.link {
            Some(target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder.append_link(&mut header, &entry.path, target)?;
            }
            None => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(entry.content.len() as u64);
                builder.append_data(&mut header, &entry.path, entry.content.as_slice())?;
            }
        }

        Ok(())
    })?;

    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(0o777);
    header.set_mtime(now);
    header.set_size(dockerfile.len() as u64);
    builder.append_data(&mut header, SERVICE_DOCKERFILE_IN_CONTEXT_TAR, dockerfile)?;

    builder.into_inner()?.flush()?;
    Ok(())
}
