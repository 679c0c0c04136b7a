//! Batch script generation

use herd_core::backend::ScriptDialect;
use herd_core::domain::commands::Commands;
use herd_core::domain::job::{JobId, JobSpec};

use crate::render::quote;

/// Builds the batch script for a job.
///
/// Layout: shebang, submit-dir export, hard `cd`, notification lines (when
/// the dialect has a notify command), sorted env exports, then the commands.
pub fn build_script(dialect: &ScriptDialect, job_id: JobId, spec: &JobSpec) -> String {
    let dir = quote(&spec.working_dir.display().to_string());
    let mut script = String::from("#!/bin/bash\n");
    script.push_str(&format!("export {}={}\n", dialect.submit_dir_var, dir));
    script.push_str(&format!("cd {} || exit 1\n", dir));

    if let Some(notify) = &dialect.notify_command {
        let index = format!("\"${{{}:-}}\"", dialect.array_index_var);
        script.push_str(&format!("trap '{} ended {} {} $?' EXIT\n", notify, job_id, index));
        script.push_str(&format!("{} started {} {}\n", notify, job_id, index));
    }

    for (key, value) in &spec.env {
        script.push_str(&format!("export {}={}\n", key, quote(value)));
    }

    match &spec.commands {
        Commands::Script { commands, .. } => {
            for command in commands {
                script.push_str(command);
                script.push('\n');
            }
        }
        Commands::Grid { groups } => {
            for (i, group) in groups.iter().enumerate() {
                script.push_str(&format!(
                    "if [ \"${{{}}}\" -eq {} ]; then\n",
                    dialect.array_index_var,
                    i + 1
                ));
                for command in group {
                    script.push_str(&format!("  {}\n", command));
                }
                script.push_str("fi\n");
            }
        }
    }

    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn spec(commands: Commands) -> JobSpec {
        JobSpec {
            container: None,
            commands,
            working_dir: PathBuf::from("/data/p1/job"),
            env: BTreeMap::new(),
            args: BTreeMap::new(),
            dependencies: vec![],
            owner_id: None,
            owner_listener_id: None,
            web_name: "job".to_string(),
            cluster_name: "job".to_string(),
        }
    }

    /// Recovers the command groups from a generated grid script
    fn parse_grid(script: &str, index_var: &str) -> Vec<Vec<String>> {
        let opener = format!("if [ \"${{{}}}\" -eq ", index_var);
        let mut groups = Vec::new();
        let mut current: Option<Vec<String>> = None;

        for line in script.lines() {
            if let Some(rest) = line.strip_prefix(&opener) {
                let n: usize = rest.trim_end_matches(" ]; then").parse().unwrap();
                assert_eq!(n, groups.len() + 1);
                current = Some(Vec::new());
            } else if line == "fi" {
                groups.push(current.take().unwrap());
            } else if let Some(group) = current.as_mut() {
                group.push(line.strip_prefix("  ").unwrap().to_string());
            }
        }
        assert!(current.is_none());
        groups
    }

    #[test]
    fn test_flat_script_slurm() {
        let mut spec = spec(Commands::Script {
            commands: vec!["relion_refine --o run1".to_string(), "echo done".to_string()],
            array_size: None,
        });
        spec.env.insert("OMP_NUM_THREADS".to_string(), "4".to_string());
        spec.env.insert("A_FIRST".to_string(), "x \"y\" $z".to_string());

        let script = build_script(&ScriptDialect::slurm("herd notify"), 12, &spec);
        let expected = "#!/bin/bash\n\
export SLURM_SUBMIT_DIR=\"/data/p1/job\"\n\
cd \"/data/p1/job\" || exit 1\n\
trap 'herd notify ended 12 \"${SLURM_ARRAY_TASK_ID:-}\" $?' EXIT\n\
herd notify started 12 \"${SLURM_ARRAY_TASK_ID:-}\"\n\
export A_FIRST=\"x \\\"y\\\" \\$z\"\n\
export OMP_NUM_THREADS=\"4\"\n\
relion_refine --o run1\n\
echo done\n";
        assert_eq!(script, expected);
    }

    #[test]
    fn test_local_dialect_has_no_notifications() {
        let spec = spec(Commands::Script {
            commands: vec!["true".to_string()],
            array_size: Some(3),
        });
        let script = build_script(&ScriptDialect::local(), 3, &spec);
        assert!(script.starts_with("#!/bin/bash\nexport HERD_SUBMIT_DIR=\"/data/p1/job\"\n"));
        assert!(!script.contains("trap"));
        assert!(!script.contains("started"));
        assert!(script.ends_with("true\n"));
    }

    #[test]
    fn test_grid_script_round_trip() {
        let groups = vec![
            vec!["ctffind --mic 1".to_string(), "echo one".to_string()],
            vec!["ctffind --mic 2".to_string()],
            vec![],
            vec!["if true; then echo nested; fi".to_string()],
        ];
        let spec = spec(Commands::Grid { groups: groups.clone() });

        let script = build_script(&ScriptDialect::slurm("herd notify"), 5, &spec);
        assert!(script.contains("if [ \"${SLURM_ARRAY_TASK_ID}\" -eq 1 ]; then\n  ctffind --mic 1\n"));
        assert_eq!(parse_grid(&script, "SLURM_ARRAY_TASK_ID"), groups);
    }

    #[test]
    fn test_grid_script_local_round_trip() {
        let groups = vec![vec!["a".to_string()], vec!["b".to_string(), "c".to_string()]];
        let spec = spec(Commands::Grid { groups: groups.clone() });
        let script = build_script(&ScriptDialect::local(), 1, &spec);
        assert_eq!(parse_grid(&script, "HERD_ARRAY_INDEX"), groups);
    }
}
