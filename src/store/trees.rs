pub const TASKS: &str = "tasks";
pub const CONFIG_VERSIONS: &str = "config_versions";

// Secondary index trees
pub const TASK_DEADLINE_INDEX: &str = "task_deadline_index";
