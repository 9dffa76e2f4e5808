//! The release job: the closure enqueued by the release endpoint.
//!
//! Executes strictly in sequence: clone, verify, build, extract, publish,
//! commit. The middle stages are pipelined through in-process byte pipes;
//! the first failing stage fails the task with a reason naming the step.

use std::{io::Read, sync::Arc};

use tokio::io::duplex;
use tokio_util::io::SyncIoBridge;
use tracing::*;

use relforge_tasks::{JobCanceled, JobContext, JobFn, TaskLogHandle, TaskScope};

use crate::{
    context::spawn_context_tar,
    dockerfile::{generate_service_dockerfile, SERVICE_DOCKERFILE_IN_CONTEXT_TAR},
    errors::ReleaseError,
    extract::extract_artifact_stream,
    traits::{ArtifactBuilder, GitSource, Publisher, SignatureVerifier},
};

/// Window of the pipe between the extractor and the publisher.
const ARTIFACT_PIPE_CAPACITY: usize = 64 * 1024;

/// Everything a release run needs, resolved from configuration by the
/// endpoint before the job is enqueued.
#[derive(Debug, Clone)]
pub struct ReleaseParams {
    pub git_url: String,
    pub git_tag: String,
    pub from_image: String,
    pub commands: Vec<String>,
    pub trusted_pgp_public_keys: Vec<String>,
    pub required_signatures: usize,
}

/// Builds the job closure handed to the task manager.
pub fn release_job<G, V, B, P>(
    params: ReleaseParams,
    git: Arc<G>,
    verifier: Arc<V>,
    builder: Arc<B>,
    publisher: Arc<P>,
) -> JobFn
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    Box::new(move |ctx| {
        Box::pin(async move {
            run_release(ctx, params, git, verifier, builder, publisher).await?;
            Ok(())
        })
    })
}

async fn run_release<G, V, B, P>(
    ctx: JobContext,
    params: ReleaseParams,
    git: Arc<G>,
    verifier: Arc<V>,
    builder: Arc<B>,
    publisher: Arc<P>,
) -> Result<(), ReleaseError>
where
    G: GitSource,
    V: SignatureVerifier,
    B: ArtifactBuilder,
    P: Publisher,
{
    let scope = ctx.scope().clone();
    ctx.log_line("Started task");

    let repo = git
        .clone_at_tag(&scope, &params.git_url, &params.git_tag)
        .await
        .map_err(ReleaseError::Clone)?;
    ctx.log_line("Cloned git repository");

    verifier
        .verify_tag_signatures(
            repo.as_ref(),
            &params.git_tag,
            &params.trusted_pgp_public_keys,
            params.required_signatures,
        )
        .map_err(ReleaseError::SignatureVerification)?;
    ctx.log_line("Verified tag signatures");

    let dockerfile = generate_service_dockerfile(&params.from_image, &params.commands);
    let (context_read, context_writer) = spawn_context_tar(repo.clone(), dockerfile);

    let messages = builder
        .build(
            &scope,
            Box::new(context_read),
            SERVICE_DOCKERFILE_IN_CONTEXT_TAR,
        )
        .await
        .map_err(ReleaseError::Build)?;
    ctx.log_line("Started artifact build");

    // The extractor writes the clean artifact tar into one end of the pipe
    // while the publisher drains entries from the other.
    let (artifact_read, artifact_write) = duplex(ARTIFACT_PIPE_CAPACITY);

    let extract_log = ctx.log().clone();
    let extractor = tokio::spawn(async move {
        extract_artifact_stream(messages, artifact_write, &extract_log).await
    });

    let publish_task = {
        let publisher = publisher.clone();
        let tag = params.git_tag.clone();
        let log = ctx.log().clone();
        let scope = scope.clone();
        let reader = SyncIoBridge::new(artifact_read);
        tokio::task::spawn_blocking(move || {
            publish_artifacts(publisher.as_ref(), &tag, reader, &scope, &log)
        })
    };

    match context_writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ReleaseError::Context(e)),
        Err(e) => {
            return Err(ReleaseError::Context(anyhow::anyhow!(
                "context writer panicked: {e}"
            )))
        }
    }

    match extractor.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ReleaseError::ArtifactStream(e)),
        Err(e) => {
            return Err(ReleaseError::Build(anyhow::anyhow!(
                "extractor panicked: {e}"
            )))
        }
    }
    ctx.log_line("Extracted artifact stream");

    match publish_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ReleaseError::Publish(e)),
        Err(e) => {
            return Err(ReleaseError::Publish(anyhow::anyhow!(
                "publisher panicked: {e}"
            )))
        }
    }

    let commit_publisher = publisher.clone();
    match tokio::task::spawn_blocking(move || commit_publisher.commit()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ReleaseError::Publish(e)),
        Err(e) => {
            return Err(ReleaseError::Publish(anyhow::anyhow!(
                "commit panicked: {e}"
            )))
        }
    }
    ctx.log_line("Committed update repository");

    info!(tag = %params.git_tag, "release published");
    Ok(())
}

/// Streams each non-directory artifact entry to the publisher, in tar
/// order. Runs on a blocking thread; the reader side of the artifact pipe
/// suspends it while the extractor catches up.
fn publish_artifacts<P: Publisher + ?Sized>(
    publisher: &P,
    tag: &str,
    reader: impl Read,
    scope: &TaskScope,
    log: &TaskLogHandle,
) -> anyhow::Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;

        if scope.is_canceled() {
            return Err(JobCanceled.into());
        }
        if entry.header().entry_type().is_dir() {
            continue;
        }

        let name = entry.path()?.to_string_lossy().into_owned();
        log.append_line(&format!("Publishing {name:?} into the update repository ..."));
        publisher.publish_release_target(tag, &name, &mut entry)?;
        log.append_line(&format!("Published {name:?} into the update repository"));
    }

    Ok(())
}
