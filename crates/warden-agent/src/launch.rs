use std::path::PathBuf;

use crate::config::ServerConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub kind: &'static str,
}

impl LaunchSpec {
    pub fn command_line(&self) -> String {
        let mut out = self.exec.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Either the configured launcher script, or java against the server jar.
pub fn resolve_launch_spec(cfg: &ServerConfig) -> LaunchSpec {
    if let Some(launcher) = &cfg.launcher {
        return LaunchSpec {
            exec: launcher.clone(),
            args: Vec::new(),
            cwd: cfg.dir.clone(),
            kind: "launcher",
        };
    }

    LaunchSpec {
        exec: PathBuf::from("java"),
        args: vec![
            "-Dfile.encoding=UTF-8".to_string(),
            "-Dsun.stdout.encoding=UTF-8".to_string(),
            "-Dsun.stderr.encoding=UTF-8".to_string(),
            format!("-Xms{}G", cfg.min_memory_gb),
            format!("-Xmx{}G", cfg.max_memory_gb),
            "-jar".to_string(),
            cfg.jar.display().to_string(),
            "nogui".to_string(),
        ],
        cwd: cfg.dir.clone(),
        kind: "jar",
    }
}
