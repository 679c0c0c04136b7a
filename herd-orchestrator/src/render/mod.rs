//! Command rendering
//!
//! Turns a job's abstract command list into a staged batch script and the
//! shell command a backend queues to run it.

pub mod container;
pub mod script;

use herd_core::backend::{ScriptDialect, StagedFile};
use herd_core::domain::container::ContainerProfile;
use herd_core::domain::job::{JobId, JobSpec};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub use container::ContainerWrapper;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown container profile: {0}")]
    UnknownContainer(String),

    #[error("invalid environment variable name: {0}")]
    InvalidEnv(String),
}

/// Output of [`CommandRenderer::render`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedJob {
    pub script_path: PathBuf,
    pub script: String,
    /// Folders to create before launch
    pub folders: Vec<PathBuf>,
    /// Shell command the backend queues
    pub command: String,
}

impl RenderedJob {
    pub fn files(&self) -> Vec<StagedFile> {
        vec![StagedFile {
            path: self.script_path.clone(),
            contents: self.script.clone(),
            executable: true,
        }]
    }
}

pub struct CommandRenderer {
    dialect: ScriptDialect,
    wrapper: ContainerWrapper,
    profiles: HashMap<String, ContainerProfile>,
}

impl CommandRenderer {
    pub fn new(
        dialect: ScriptDialect,
        wrapper: ContainerWrapper,
        profiles: HashMap<String, ContainerProfile>,
    ) -> Self {
        Self {
            dialect,
            wrapper,
            profiles,
        }
    }

    /// Rejects specs that could never render. Runs before persistence.
    pub fn check(&self, spec: &JobSpec) -> Result<(), RenderError> {
        if let Some(name) = &spec.container {
            if !self.profiles.contains_key(name) {
                return Err(RenderError::UnknownContainer(name.clone()));
            }
        }
        if let Some(key) = spec.env.keys().find(|key| !is_env_name(key)) {
            return Err(RenderError::InvalidEnv(key.clone()));
        }
        Ok(())
    }

    pub fn render(&self, job_id: JobId, spec: &JobSpec) -> Result<RenderedJob, RenderError> {
        self.check(spec)?;

        let script_path = spec.script_path(job_id);
        let script = script::build_script(&self.dialect, job_id, spec);
        let mut command = format!("bash {}", quote(&script_path.display().to_string()));

        if let Some(name) = &spec.container {
            let profile = self
                .profiles
                .get(name)
                .ok_or_else(|| RenderError::UnknownContainer(name.clone()))?;
            command = self
                .wrapper
                .wrap(profile, &spec.working_dir, spec.requests_gpu(), &command);
        }

        Ok(RenderedJob {
            script_path,
            script,
            folders: vec![spec.working_dir.clone()],
            command,
        })
    }
}

/// Double-quotes a value for bash
pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::domain::commands::Commands;
    use std::collections::BTreeMap;

    fn renderer() -> CommandRenderer {
        let mut profiles = HashMap::new();
        profiles.insert(
            "relion".to_string(),
            ContainerProfile {
                image: PathBuf::from("/images/relion.sif"),
                binds: vec![],
                prelaunch: vec!["module load cuda".to_string()],
            },
        );
        CommandRenderer::new(
            ScriptDialect::slurm("herd notify"),
            ContainerWrapper::new("apptainer", "/data"),
            profiles,
        )
    }

    fn spec() -> JobSpec {
        JobSpec {
            container: None,
            commands: Commands::Script {
                commands: vec!["echo hi".to_string()],
                array_size: None,
            },
            working_dir: PathBuf::from("/data/p1"),
            env: BTreeMap::new(),
            args: BTreeMap::new(),
            dependencies: vec![],
            owner_id: None,
            owner_listener_id: None,
            web_name: "hi".to_string(),
            cluster_name: "hi".to_string(),
        }
    }

    #[test]
    fn test_quote_escapes_shell_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b$c`d\\e"), "\"a\\\"b\\$c\\`d\\\\e\"");
    }

    #[test]
    fn test_render_plain_command() {
        let rendered = renderer().render(7, &spec()).unwrap();
        assert_eq!(rendered.script_path, PathBuf::from("/data/p1/herd-7.sh"));
        assert_eq!(rendered.command, "bash \"/data/p1/herd-7.sh\"");
        assert_eq!(rendered.folders, vec![PathBuf::from("/data/p1")]);

        let files = rendered.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].executable);
        assert!(files[0].contents.starts_with("#!/bin/bash\n"));
    }

    #[test]
    fn test_render_in_container_requests_gpu() {
        let mut spec = spec();
        spec.container = Some("relion".to_string());
        spec.args.insert("gres".to_string(), serde_json::json!("gpu:2"));

        let rendered = renderer().render(8, &spec).unwrap();
        assert_eq!(
            rendered.command,
            "module load cuda\napptainer exec --no-home --bind=/data --nv --pwd \"/data/p1\" \
             \"/images/relion.sif\" bash \"/data/p1/herd-8.sh\""
        );
    }

    #[test]
    fn test_check_rejects_unknown_container_and_bad_env() {
        let renderer = renderer();

        let mut unknown = spec();
        unknown.container = Some("missing".to_string());
        assert!(matches!(
            renderer.check(&unknown),
            Err(RenderError::UnknownContainer(name)) if name == "missing"
        ));

        let mut bad_env = spec();
        bad_env.env.insert("1BAD".to_string(), "x".to_string());
        assert!(matches!(renderer.check(&bad_env), Err(RenderError::InvalidEnv(_))));

        let mut good_env = spec();
        good_env.env.insert("_OK_1".to_string(), "x".to_string());
        assert!(renderer.check(&good_env).is_ok());
    }
}
