// Copyright (c) 2024-2026 Otto Contributors
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod registry;
mod tool;

pub use registry::ToolRegistry;
pub use tool::{Tool, ToolEnv, ToolError};

pub use builtin::http_fetch::HttpFetchTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::run_command::RunCommandTool;
pub use builtin::write_file::WriteFileTool;
