//! Launch command construction.

use std::path::Path;

use fleet_core::ParticipantId;

use crate::catalog::{Runtime, VersionType};
use crate::template::ConfigurationTemplate;

/// Runtimes above this major version need the module-access flags.
pub const COMPAT_FLAGS_ABOVE_MAJOR: u32 = 8;

const COMPAT_FLAGS: [&str; 8] = [
    "--add-opens=java.base/java.lang=ALL-UNNAMED",
    "--add-opens=java.base/java.util.concurrent=ALL-UNNAMED",
    "--add-opens=java.base/java.text=ALL-UNNAMED",
    "--add-opens=java.base/java.util=ALL-UNNAMED",
    "--add-opens=java.base/java.math=ALL-UNNAMED",
    "--add-exports=java.base/jdk.internal.misc=ALL-UNNAMED",
    "--add-opens=java.base/java.net=ALL-UNNAMED",
    "--add-opens=java.base/sun.net.www.protocol.https=ALL-UNNAMED",
];

/// Values substituted into templated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    /// `%PORT%`
    pub port: u16,
    /// `%SERVICE_ID%`
    pub service_id: ParticipantId,
    /// `%HOSTNAME%`
    pub hostname: String,
    /// `%PROXY_SECRET%`
    pub proxy_secret: String,
}

impl Placeholders {
    /// Replace every recognized placeholder in `text`.
    #[must_use]
    pub fn apply(&self, text: &str) -> String {
        text.replace("%PORT%", &self.port.to_string())
            .replace("%SERVICE_ID%", &self.service_id.to_name())
            .replace("%HOSTNAME%", &self.hostname)
            .replace("%PROXY_SECRET%", &self.proxy_secret)
    }
}

/// Everything the argument vector is built from.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec<'a> {
    /// Template being started.
    pub template: &'a ConfigurationTemplate,
    /// Resolved runtime.
    pub runtime: &'a Runtime,
    /// Interpreter path on this node.
    pub runtime_path: &'a Path,
    /// Resolved version type.
    pub version_type: &'a VersionType,
    /// Executable archive to run.
    pub executable: &'a Path,
    /// Placeholder values.
    pub placeholders: &'a Placeholders,
}

/// Build the full argument vector; the first element is the interpreter.
#[must_use]
pub fn build_command(spec: &CommandSpec<'_>) -> Vec<String> {
    let subst = |args: &[String]| -> Vec<String> {
        args.iter().map(|a| spec.placeholders.apply(a)).collect()
    };

    let mut argv = vec![spec.runtime_path.display().to_string()];

    if spec.runtime.major > COMPAT_FLAGS_ABOVE_MAJOR {
        argv.extend(COMPAT_FLAGS.iter().map(ToString::to_string));
    }
    argv.extend(subst(&spec.template.runtime_args));
    argv.push(format!("-Xms{}M", spec.template.max_memory_mb));
    argv.push(format!("-Xmx{}M", spec.template.max_memory_mb));
    argv.extend(subst(&spec.version_type.runtime_args));
    argv.push("-jar".to_string());
    argv.push(spec.executable.display().to_string());
    argv.extend(subst(&spec.version_type.program_args));
    argv.extend(subst(&spec.template.program_args));

    argv
}
