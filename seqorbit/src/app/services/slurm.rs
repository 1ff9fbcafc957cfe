// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::services::shell::sh_escape;
use crate::app::types::JobState;

/// Extracts the job id from sbatch output such as "Submitted batch job 11".
/// The id stays a string; it is opaque to everything downstream.
pub fn parse_job_id(output: &str) -> Option<String> {
    let marker = "Submitted batch job";
    output.lines().find_map(|line| {
        let idx = line.find(marker)?;
        let token = line[idx + marker.len()..].split_whitespace().next()?;
        // Federated clusters append ";cluster" to the id.
        let id = token.split(';').next().unwrap_or(token);
        if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    })
}

pub fn sbatch_command(work_dir: &str, script_path: &str) -> String {
    format!(
        "sbatch --chdir {} {}",
        sh_escape(work_dir),
        sh_escape(script_path)
    )
}

pub fn squeue_command(job_id: &str) -> String {
    format!("squeue -j {} -h -o %T", sh_escape(job_id))
}

pub fn sacct_command(job_id: &str) -> String {
    format!("sacct -j {} -X -n -P -o State", sh_escape(job_id))
}

pub fn scancel_command(job_id: &str) -> String {
    format!("scancel {}", sh_escape(job_id))
}

/// First non-empty state token reported by squeue or sacct.
pub fn first_state_token(output: &str) -> Option<&str> {
    output.lines().find_map(|line| {
        let state = line.trim();
        let state = state.split('|').next().unwrap_or(state).trim();
        if state.is_empty() { None } else { Some(state) }
    })
}

fn normalize_slurm_state(state: &str) -> String {
    let token = state
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .next()
        .unwrap_or(state)
        .trim();
    token.to_ascii_uppercase()
}

/// Maps a scheduler state string onto `JobState`. Vocabulary outside the known
/// set comes back as `Unknown` so the caller can count it as a failed query.
pub fn map_slurm_state(raw: &str) -> JobState {
    match normalize_slurm_state(raw).as_str() {
        "PENDING" | "REQUEUED" | "REQUEUE_HOLD" | "REQUEUE_FED" | "SUSPENDED" | "RESIZING" => {
            JobState::Pending
        }
        "CONFIGURING" => JobState::Configuring,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" | "STAGE_IN" | "SIGNALING" => JobState::Running,
        "COMPLETED" => JobState::Completed,
        "CANCELLED" | "REVOKED" | "DEADLINE" => JobState::Cancelled,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "PREEMPTED" | "BOOT_FAIL" | "OUT_OF_MEMORY"
        | "SPECIAL_EXIT" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Parses "HH:MM:SS" or "D-HH:MM:SS" into seconds.
pub fn parse_slurm_duration(s: &str) -> Option<u64> {
    let s = s.trim();
    let (days, hms) = if let Some(dash) = s.find('-') {
        let (d, rest) = s.split_at(dash);
        let d: u64 = d.parse().ok()?;
        (d, &rest[1..])
    } else {
        (0, s)
    };

    let mut it = hms.split(':');
    let (h, m, sec) = (it.next()?, it.next()?, it.next()?);
    if it.next().is_some() {
        return None;
    }

    let (h, m, sec): (u64, u64, u64) = (h.parse().ok()?, m.parse().ok()?, sec.parse().ok()?);
    if m >= 60 || sec >= 60 {
        return None;
    }
    let total = days
        .saturating_mul(24 * 3600)
        .saturating_add(h.saturating_mul(3600))
        .saturating_add(m * 60)
        .saturating_add(sec);
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_job_id_from_sbatch_ack() {
        assert_eq!(
            parse_job_id("Submitted batch job 12345\n").as_deref(),
            Some("12345")
        );
        assert_eq!(
            parse_job_id("sbatch: note: defaults applied\nSubmitted batch job 77;galileo\n")
                .as_deref(),
            Some("77")
        );
    }

    #[test]
    fn missing_job_id_is_none() {
        assert_eq!(parse_job_id(""), None);
        assert_eq!(
            parse_job_id("sbatch: error: Batch job submission failed"),
            None
        );
        assert_eq!(parse_job_id("Submitted batch job abc"), None);
    }

    #[test]
    fn maps_scheduler_states() {
        assert_eq!(map_slurm_state("PENDING"), JobState::Pending);
        assert_eq!(map_slurm_state("configuring"), JobState::Configuring);
        assert_eq!(map_slurm_state("RUNNING"), JobState::Running);
        assert_eq!(map_slurm_state("COMPLETING"), JobState::Running);
        assert_eq!(map_slurm_state("COMPLETED"), JobState::Completed);
        assert_eq!(map_slurm_state("CANCELLED by 1234"), JobState::Cancelled);
        assert_eq!(map_slurm_state("CANCELLED+"), JobState::Cancelled);
        assert_eq!(map_slurm_state("OUT_OF_MEMORY"), JobState::Failed);
        assert_eq!(map_slurm_state("TIMEOUT"), JobState::Failed);
        assert_eq!(map_slurm_state("squeue: error"), JobState::Unknown);
        assert_eq!(map_slurm_state(""), JobState::Unknown);
    }

    #[test]
    fn first_state_token_skips_blank_lines() {
        assert_eq!(first_state_token("\n  \nFAILED|\nCOMPLETED|\n"), Some("FAILED"));
        assert_eq!(first_state_token("RUNNING\n"), Some("RUNNING"));
        assert_eq!(first_state_token("  \n"), None);
    }

    #[test]
    fn builds_quoted_commands() {
        assert_eq!(
            sbatch_command("/scratch/u/dec", "/scratch/u/dec/cen_script.sh"),
            "sbatch --chdir '/scratch/u/dec' '/scratch/u/dec/cen_script.sh'"
        );
        assert_eq!(squeue_command("42"), "squeue -j '42' -h -o %T");
        assert_eq!(scancel_command("42"), "scancel '42'");
    }

    #[test]
    fn parses_slurm_durations() {
        assert_eq!(parse_slurm_duration("24:00:00"), Some(24 * 3600));
        assert_eq!(parse_slurm_duration("1-02:03:04"), Some(93_784));
        assert_eq!(parse_slurm_duration("10:00"), None);
        assert_eq!(parse_slurm_duration("01:75:00"), None);
        assert_eq!(parse_slurm_duration("x:00:00"), None);
    }
}
