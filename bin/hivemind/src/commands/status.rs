use hivemind_core::{Config, Paths};
use hivemind_storage::open_store;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("hivemind status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (not found)" }
    );

    if !config_exists {
        println!();
        println!("Run `hivemind onboard` to initialize.");
        return Ok(());
    }

    let config = Config::load(&config_path)?;
    println!(
        "Storage:   {:?} ({})",
        config.storage.backend,
        config.storage_path(&paths).display()
    );
    println!("Policy:    {:?}", config.router.policy);
    println!(
        "Cycles:    {} (practice every {}s, ingestion every {}s)",
        if config.scheduler.enabled { "enabled" } else { "disabled" },
        config.scheduler.practice_interval_secs,
        config.scheduler.ingestion_interval_secs
    );
    println!();

    println!("Agents:");
    if config.agents.is_empty() {
        println!("  (none)");
    }
    for agent in &config.agents {
        println!("  {:<16} {}", agent.id, agent.role.as_str());
    }
    println!();

    println!("Links:");
    if config.links.is_empty() {
        println!("  (none)");
    }
    for link in &config.links {
        println!(
            "  {:<16} {:<12} {}",
            link.name,
            link.transport.as_str(),
            if link.config.url.is_empty() { "(no url)" } else { link.config.url.as_str() }
        );
    }
    println!();

    let store = open_store(&config, &paths)?;
    match store.load_all().await {
        Ok(Some(snapshot)) => {
            println!("Learning state:");
            println!("  patterns:      {}", snapshot.patterns.len());
            println!("  pathways:      {}", snapshot.pathways.len());
            println!("  open sessions: {}", snapshot.sessions.len());
            println!("  topics:        {}", snapshot.knowledge.len());
        }
        Ok(None) => println!("Learning state: (none saved)"),
        Err(e) => println!("Learning state: ✗ {}", e),
    }

    Ok(())
}
