//! Service Dockerfile generation.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::extract::{ARTIFACTS_TAR_START_CODE, ARTIFACTS_TAR_STOP_CODE};

/// Where the project worktree lands inside the build container.
pub const CONTAINER_SOURCE_DIR: &str = "/git";

/// Where user commands are expected to leave release artifacts.
pub const CONTAINER_ARTIFACTS_DIR: &str = "/result";

/// Service directory injected into the context tar; removed from the source
/// tree before user commands execute.
pub const SERVICE_DIR_IN_CONTEXT_TAR: &str = ".trdl";

/// Path of the generated Dockerfile inside the context tar.
pub const SERVICE_DOCKERFILE_IN_CONTEXT_TAR: &str = ".trdl/Dockerfile";

/// Generates the service Dockerfile for a build: copy the worktree in, run
/// the user commands, then stream the artifacts dir out framed by the
/// sentinel codes.
///
/// The sentinels are materialized in the container by base64-decoding
/// themselves so they never appear verbatim in the Dockerfile; otherwise the
/// builder echoing its own instructions would trigger extraction early.
pub fn generate_service_dockerfile(from_image: &str, run_commands: &[String]) -> Vec<u8> {
    let mut data = String::new();
    let mut add_line = |line: String| {
        data.push_str(&line);
        data.push('\n');
    };

    add_line(format!("FROM {from_image}"));

    // copy source code and set workdir for the following instructions
    add_line(format!("COPY . {CONTAINER_SOURCE_DIR}"));
    add_line(format!("WORKDIR {CONTAINER_SOURCE_DIR}"));

    // remove service data from the user's context
    add_line(format!("RUN rm -rf {SERVICE_DIR_IN_CONTEXT_TAR}"));

    // create empty dir for release artifacts
    add_line(format!("RUN mkdir {CONTAINER_ARTIFACTS_DIR}"));

    // run the user's build commands
    for command in run_commands {
        add_line(format!("RUN {command}"));
    }

    // tar result files to stdout, framed with the sentinel codes
    let service_run_commands = [
        format!(
            "echo -n $(echo -n '{}' | base64 -d)",
            BASE64.encode(ARTIFACTS_TAR_START_CODE)
        ),
        format!("tar c -C {CONTAINER_ARTIFACTS_DIR} . | base64"),
        format!(
            "echo -n $(echo -n '{}' | base64 -d)",
            BASE64.encode(ARTIFACTS_TAR_STOP_CODE)
        ),
    ];
    add_line(format!("RUN {}", service_run_commands.join(" && ")));

    data.into_bytes()
}
