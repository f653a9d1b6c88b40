use serde::Serialize;

use accolade_core::config::LoadOptions;
use accolade_db::{connect_with_settings, migrations, DemoRoster};

use crate::commands::{build_runtime, load_config, CommandResult, Failure};

#[derive(Debug, Serialize)]
struct SeededEmployee {
    employee_id: &'static str,
    full_name: &'static str,
}

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(failure) => return CommandResult::from_failure("seed", failure),
    };
    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(failure) => return CommandResult::from_failure("seed", failure),
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoRoster::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = DemoRoster::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome = if verification.all_present {
            Ok(seeded
                .employees_seeded
                .iter()
                .map(|entry| SeededEmployee {
                    employee_id: entry.employee_id,
                    full_name: entry.full_name,
                })
                .collect::<Vec<_>>())
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(employees) => CommandResult::success_with_data(
            "seed",
            format!("demo roster loaded with {} employees", employees.len()),
            &employees,
        ),
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed.is_empty() {
        "some demo roster rows failed to load".to_string()
    } else {
        format!("demo roster verification failed for checks: {}", failed.join(", "))
    }
}
