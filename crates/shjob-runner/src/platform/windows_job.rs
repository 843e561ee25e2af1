use windows::Win32::Foundation::{CloseHandle, HANDLE};

use crate::error::ProcessTreeError;

/// RAII wrapper for a Job Object handle.
///
/// The job is created with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`, so closing
/// the last handle terminates every process still in the job.
pub(super) struct JobObjectHandle {
    handle: HANDLE,
}

// SAFETY: a HANDLE is an opaque kernel object reference usable from any thread.
unsafe impl Send for JobObjectHandle {}
unsafe impl Sync for JobObjectHandle {}

impl Drop for JobObjectHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

pub(super) fn create_job_object() -> Result<JobObjectHandle, ProcessTreeError> {
    use windows::Win32::System::JobObjects::{
        CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
        JobObjectExtendedLimitInformation, SetInformationJobObject,
    };

    unsafe {
        let job = CreateJobObjectW(None, None).map_err(|e| ProcessTreeError::CreateJob {
            reason: e.to_string(),
        })?;
        let guard = JobObjectHandle { handle: job };

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = std::mem::zeroed();
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

        SetInformationJobObject(
            guard.handle,
            JobObjectExtendedLimitInformation,
            (&raw const info).cast(),
            std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
        )
        .map_err(|e| ProcessTreeError::ConfigureJob {
            reason: e.to_string(),
        })?;

        Ok(guard)
    }
}

pub(super) fn assign_to_job(
    job: &JobObjectHandle,
    child: &tokio::process::Child,
) -> Result<(), ProcessTreeError> {
    use windows::Win32::System::JobObjects::AssignProcessToJobObject;
    use windows::Win32::System::Threading::{OpenProcess, PROCESS_ALL_ACCESS};

    let Some(pid) = child.id() else {
        return Ok(());
    };

    unsafe {
        let process = OpenProcess(PROCESS_ALL_ACCESS, false, pid).map_err(|e| {
            ProcessTreeError::OpenProcess {
                pid,
                reason: e.to_string(),
            }
        })?;
        let assigned = AssignProcessToJobObject(job.handle, process).map_err(|e| {
            ProcessTreeError::AssignProcess {
                pid,
                reason: e.to_string(),
            }
        });
        let _ = CloseHandle(process);
        assigned
    }
}

/// Terminate every process in the job immediately.
pub(super) fn terminate_job(job: &JobObjectHandle) {
    use windows::Win32::System::JobObjects::TerminateJobObject;

    unsafe {
        if let Err(e) = TerminateJobObject(job.handle, 1) {
            tracing::debug!(error = %e, "TerminateJobObject failed");
        }
    }
}
