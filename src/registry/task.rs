//! Native tasks on the host's worker thread pool
//!
//! The task userdata is the managed task handle. The host may run the
//! callbacks on any of its worker threads, several at once for group tasks.

use crate::error::{ffi_guard, BridgeError, Result};
use crate::handle::userdata;
use crate::host::abi::*;
use crate::host_fn;
use crate::managed::managed;
use crate::runtime::Bridge;
use core::ffi::c_void;

#[inline]
fn task_handle(userdata: *mut c_void) -> u64 {
    userdata as usize as u64
}

/// How a group task is split across workers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupTask {
    pub elements: i32,
    /// Worker count; -1 lets the host decide
    pub tasks: i32,
}

impl Bridge {
    /// Queue managed task `task` on `pool`; returns the host's task id
    pub fn add_task(&self, pool: ObjectPtr, task: u64, high_priority: bool, description: &str) -> Result<i64> {
        let add = host_fn!(self.api(), worker_thread_pool_add_native_task)?;
        let data = self.task_userdata(task)?;
        let description = self.variants().string(description)?;
        // SAFETY: the host copies the description before returning
        let id = unsafe { add(pool, run, data, high_priority as Bool, description.as_ptr()) };
        tracing::debug!(target: "registry", task, id, "native task queued");
        Ok(id)
    }

    /// Queue `group.elements` calls of managed task `task`, spread over `group.tasks` workers
    pub fn add_group_task(
        &self,
        pool: ObjectPtr,
        task: u64,
        group: GroupTask,
        high_priority: bool,
        description: &str,
    ) -> Result<i64> {
        let add = host_fn!(self.api(), worker_thread_pool_add_native_group_task)?;
        let data = self.task_userdata(task)?;
        let description = self.variants().string(description)?;
        // SAFETY: as in `add_task`
        let id = unsafe {
            add(pool, run_group, data, group.elements, group.tasks, high_priority as Bool, description.as_ptr())
        };
        tracing::debug!(target: "registry", task, id, elements = group.elements, "native group task queued");
        Ok(id)
    }

    fn task_userdata(&self, task: u64) -> Result<*mut c_void> {
        if task == 0 {
            return Err(BridgeError::StaleHandle(0));
        }
        userdata(task).ok_or(BridgeError::HandleTooWide(task))
    }
}

unsafe extern "C" fn run(userdata: *mut c_void) {
    ffi_guard("worker_task", (), || {
        if let Ok(target) = managed() {
            target.run_task(task_handle(userdata));
        }
    })
}

unsafe extern "C" fn run_group(userdata: *mut c_void, index: u32) {
    ffi_guard("worker_group_task", (), || {
        if let Ok(target) = managed() {
            target.run_group_task(task_handle(userdata), index);
        }
    })
}
