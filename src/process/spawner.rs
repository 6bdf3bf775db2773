use crate::discovery::ServiceDescriptor;
use crate::error::{CorralError, Result};
use crate::process::signals;
use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// How services are launched: injected environment and output handling
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub host: String,
    pub host_var: String,
    pub port_var: String,
    pub extra_env: HashMap<String, String>,
    /// Pipe stdout/stderr for capture; otherwise they go to /dev/null
    pub capture_output: bool,
}

impl SpawnOptions {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            host_var: "HOST".to_string(),
            port_var: "PORT".to_string(),
            extra_env: HashMap::new(),
            capture_output: true,
        }
    }
}

/// A freshly spawned service process.
///
/// The process group is force-killed on drop unless [`SpawnedProcess::disarm`]
/// hands the child over, so an abandoned startup never leaks a process.
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Option<Child>,
    pub pid: u32,
    pub name: String,
}

impl SpawnedProcess {
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Take ownership of the child, ending the kill-on-drop guard
    pub fn disarm(mut self) -> Option<Child> {
        self.child.take()
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::debug!("Killing abandoned process group {} ({})", self.pid, self.name);
            let _ = signals::signal_group(self.pid, Signal::SIGKILL);
            // Reap if already gone; tokio reaps the rest in the background
            let _ = child.try_wait();
        }
    }
}

/// Spawn a service's entrypoint in its own process group
///
/// The child runs inside its service directory with the assigned port and
/// bind host in its environment. Stdout and stderr are piped when output is
/// captured; stdin is closed.
///
/// # Arguments
/// * `service` - Descriptor with an allocated port
/// * `options` - Environment to inject and output handling
///
/// # Returns
/// * `Ok(SpawnedProcess)` - Spawned process guarded against leaks
/// * `Err(CorralError::StartError)` - The OS refused to spawn it
pub fn spawn_service(service: &ServiceDescriptor, options: &SpawnOptions) -> Result<SpawnedProcess> {
    if !service.entrypoint.script.exists() {
        return Err(CorralError::StartError(
            service.name.clone(),
            format!(
                "entrypoint does not exist: {}",
                service.entrypoint.script.display()
            ),
        ));
    }

    let output = || {
        if options.capture_output {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut command = Command::new(&service.entrypoint.program);
    command
        .args(&service.entrypoint.args)
        .current_dir(&service.dir)
        .envs(&options.extra_env)
        .env(&options.port_var, service.port.to_string())
        .env(&options.host_var, &options.host)
        .stdin(Stdio::null())
        .stdout(output())
        .stderr(output())
        .process_group(0);

    let child = command.spawn().map_err(|e| {
        CorralError::StartError(
            service.name.clone(),
            format!(
                "failed to spawn {}: {}",
                service.entrypoint.program.display(),
                e
            ),
        )
    })?;

    let pid = child.id().ok_or_else(|| {
        CorralError::StartError(service.name.clone(), "process exited before its PID was read".to_string())
    })?;

    tracing::debug!(
        "Spawned {} (pid {}) on port {}",
        service.name,
        pid,
        service.port
    );

    Ok(SpawnedProcess {
        child: Some(child),
        pid,
        name: service.name.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Entrypoint;
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::Pid;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn sh_service(dir: &Path, name: &str, script: &str, port: u16) -> ServiceDescriptor {
        let service_dir = dir.join(name);
        fs::create_dir_all(&service_dir).unwrap();
        fs::write(service_dir.join("run.sh"), script).unwrap();
        ServiceDescriptor {
            name: name.to_string(),
            dir: service_dir.clone(),
            entrypoint: Entrypoint {
                program: "sh".into(),
                args: vec!["run.sh".to_string()],
                script: service_dir.join("run.sh"),
            },
            port,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_spawn_injects_port_and_host() {
        let temp_dir = TempDir::new().unwrap();
        let service = sh_service(temp_dir.path(), "echo", "echo \"$HOST:$PORT $GREETING\"\n", 8123);
        let mut options = SpawnOptions::new("127.0.0.1");
        options.extra_env.insert("GREETING".to_string(), "hi".to_string());

        let spawned = spawn_service(&service, &options).unwrap();
        assert!(spawned.pid > 0);

        let mut child = spawned.disarm().unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        child.wait().await.unwrap();

        assert_eq!(output.trim(), "127.0.0.1:8123 hi");
    }

    #[tokio::test]
    async fn test_spawn_runs_in_service_dir() {
        let temp_dir = TempDir::new().unwrap();
        let service = sh_service(temp_dir.path(), "pwd", "pwd\n", 8000);

        let mut child = spawn_service(&service, &SpawnOptions::new("127.0.0.1"))
            .unwrap()
            .disarm()
            .unwrap();
        let mut output = String::new();
        child
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut output)
            .await
            .unwrap();
        child.wait().await.unwrap();

        let expected = fs::canonicalize(&service.dir).unwrap();
        assert_eq!(fs::canonicalize(output.trim()).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let temp_dir = TempDir::new().unwrap();
        let mut service = sh_service(temp_dir.path(), "broken", "exit 0\n", 8000);
        service.entrypoint.program = "/nonexistent/interpreter".into();

        let result = spawn_service(&service, &SpawnOptions::new("127.0.0.1"));
        assert!(matches!(result, Err(CorralError::StartError(name, _)) if name == "broken"));
    }

    #[tokio::test]
    async fn test_dropped_guard_kills_group() {
        let temp_dir = TempDir::new().unwrap();
        let service = sh_service(temp_dir.path(), "sleeper", "sleep 30\n", 8000);

        let spawned = spawn_service(&service, &SpawnOptions::new("127.0.0.1")).unwrap();
        let pid = spawned.pid;
        assert!(signals::group_alive(pid));

        drop(spawned);

        // The leader is our child, so reap it here to observe how it died
        let status = tokio::task::spawn_blocking(move || {
            waitpid(Pid::from_raw(pid as i32), None)
        })
        .await
        .unwrap();
        match status {
            Ok(WaitStatus::Signaled(_, Signal::SIGKILL, _)) => {}
            // Already reaped in the background
            Err(Errno::ECHILD) => {}
            other => panic!("unexpected wait status: {:?}", other),
        }
    }
}
