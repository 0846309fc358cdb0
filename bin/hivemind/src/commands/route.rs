use hivemind_core::{Config, Paths, TaskInput, TaskPriority};
use hivemind_router::RoleRouter;

pub fn run(task_type: &str, priority: &str) -> anyhow::Result<()> {
    let priority = TaskPriority::from_str(priority)
        .ok_or_else(|| anyhow::anyhow!("unknown priority {:?} (low, medium, high, urgent)", priority))?;

    let config = Config::load_or_default(&Paths::new())?;
    let router = RoleRouter::new().with_table_entries(&config.router.task_table);
    let decision = router.decide(task_type, &TaskInput::default(), priority);

    println!("{} ({}) → {}  [{:?}]", task_type, priority, decision.role, decision.reason);
    Ok(())
}
