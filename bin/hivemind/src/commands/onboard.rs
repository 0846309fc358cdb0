use hivemind_core::{Config, Paths};
use std::io::{self, Write};

pub async fn run(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        print!("Config already exists. Overwrite? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    paths.ensure_dirs()?;

    let config = Config::starter();
    config.save(&paths.config_file())?;
    println!("✓ Created config: {}", paths.config_file().display());
    println!("✓ Registered {} starter agents", config.agents.len());
    println!("✓ State directory: {}", paths.state_dir().display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to add remote links", paths.config_file().display());
    println!("  2. Run `hivemind status` to verify configuration");
    println!("  3. Run `hivemind run` to start the coordinator");

    Ok(())
}
