use hivemind_core::{Config, Paths};
use hivemind_storage::open_store;

pub async fn run(json: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = open_store(&config, &paths)?;

    let Some(snapshot) = store.load_all().await? else {
        println!("No saved learning state. Run `hivemind run` first.");
        return Ok(());
    };
    let metrics = snapshot.metrics;

    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    println!("Collective intelligence: {:.3}", metrics.collective_intelligence);
    println!("Learning velocity:       {:.2} patterns/h", metrics.learning_velocity);
    println!("Network efficiency:      {:.1}%", metrics.network_efficiency * 100.0);
    println!();
    println!("Topics:    {}", metrics.topic_count);
    println!("Strength:  {:.3} (mean)", metrics.mean_capability_strength);
    println!("Pathways:  {}", metrics.pathway_count);
    println!("Patterns:  {}", metrics.pattern_count);
    println!("Computed:  {}", metrics.computed_at.to_rfc3339());

    if !metrics.emergent_behavior_log.is_empty() {
        println!();
        println!("Emergent behavior:");
        for record in &metrics.emergent_behavior_log {
            println!("  {}  {}", record.detected_at.format("%Y-%m-%d %H:%M"), record.description);
        }
    }
    Ok(())
}
