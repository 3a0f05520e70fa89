//! Platform process helpers shared by the launcher and its tests.

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
	#[cfg(unix)]
	{
		if pid == 0 {
			return false;
		}

		let stat = std::path::PathBuf::from("/proc").join(pid.to_string()).join("stat");
		if let Ok(content) = std::fs::read_to_string(&stat) {
			// zombies still have a /proc entry
			return !is_zombie_stat(&content);
		}

		std::process::Command::new("kill")
			.arg("-0")
			.arg(pid.to_string())
			.status()
			.map(|status| status.success())
			.unwrap_or(false)
	}

	#[cfg(not(unix))]
	{
		pid == std::process::id()
	}
}

/// Sends SIGTERM to the process group led by `pid`.
///
/// Returns `false` when the signal could not be delivered, in which case the
/// caller falls back to killing the child directly.
pub(crate) async fn terminate_group(pid: u32) -> bool {
	#[cfg(unix)]
	{
		tokio::process::Command::new("kill")
			.args(["-TERM", "--", &format!("-{pid}")])
			.stdout(std::process::Stdio::null())
			.stderr(std::process::Stdio::null())
			.status()
			.await
			.map(|status| status.success())
			.unwrap_or(false)
	}

	#[cfg(not(unix))]
	{
		let _ = pid;
		false
	}
}

#[cfg(any(test, unix))]
fn is_zombie_stat(stat: &str) -> bool {
	// state follows the parenthesised command name, which may itself contain spaces
	stat.rfind(')')
		.and_then(|idx| stat[idx + 1..].split_whitespace().next())
		.is_some_and(|state| state == "Z" || state == "X")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zombie_state_is_parsed_after_command_name() {
		assert!(is_zombie_stat("1234 (sh) Z 1 1234 1234 0 -1"));
		assert!(!is_zombie_stat("1234 (my driver) S 1 1234 1234 0 -1"));
		assert!(!is_zombie_stat("garbage"));
	}

	#[cfg(unix)]
	#[test]
	fn current_process_is_alive() {
		assert!(pid_is_alive(std::process::id()));
	}

	#[cfg(unix)]
	#[test]
	fn pid_zero_is_never_alive() {
		assert!(!pid_is_alive(0));
	}
}
