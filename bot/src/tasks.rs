//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Asynchronous tasks and the task manager

mod builtin;
mod context;
mod manager;
mod task;

pub use builtin::{DelayTask, StatusReportTask};
pub use context::{TaskContext, TaskContextData};
pub use manager::{CycleReport, TaskManager, TaskManagerStatus, TaskStatistics};
pub use task::{
    Cancelled, DEFAULT_TASK_MAX_RETRIES, DEFAULT_TASK_RETRY_DELAY, DEFAULT_TASK_TIMEOUT,
    ProgressCallback, Task, TaskBody, TaskCallback, TaskControl, TaskError, TaskId, TaskInfo,
    TaskResult, TaskStatus,
};
