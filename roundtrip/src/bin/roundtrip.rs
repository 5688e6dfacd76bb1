// Shared-memory ping-pong over a one-byte TCP token.
//
//   roundtrip server   creates the shm object, listens on 127.0.0.1:5555,
//                      writes slot b, sends b, waits for the reply
//   roundtrip client   connects, opens the shm object, checks slot b,
//                      replies b+1
//
// Both sides print round trips per second. --cycles N stops after N round
// trips instead of running until the peer goes away.
use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};

use roundtrip::trace::init_tracing;
use roundtrip::{Config, Driver, Role};

const EXIT_FAILURE: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_INTEGRITY: u8 = 3;

fn parse_args(args: &[String]) -> Option<(Role, Option<u64>)> {
    let role = args.get(1)?.parse::<Role>().ok()?;
    match &args[2..] {
        [] => Some((role, None)),
        [flag, n] if flag == "--cycles" => Some((role, Some(n.parse().ok()?))),
        _ => None,
    }
}

fn run(role: Role, cycles: Option<u64>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!(%role, shm = %config.shm_name, addr = %config.addr, "starting");

    let mut driver = match role {
        Role::Server => Driver::server(&config),
        Role::Client => Driver::client(&config),
    }
    .with_context(|| format!("{} setup failed", role))?;

    match cycles {
        Some(n) => driver.run_cycles(n)?,
        None => match driver.run()? {},
    }
    info!(%role, roundtrips = driver.roundtrips(), "done");
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let Some((role, cycles)) = parse_args(&args) else {
        let prog = args.first().map(String::as_str).unwrap_or("roundtrip");
        eprintln!("usage: {} server|client [--cycles N]", prog);
        return ExitCode::from(EXIT_USAGE);
    };

    init_tracing();

    match run(role, cycles) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let integrity = err
                .downcast_ref::<roundtrip::Error>()
                .map_or(false, roundtrip::Error::is_integrity);
            error!(%role, error = %format!("{:#}", err), "benchmark aborted");
            if integrity {
                ExitCode::from(EXIT_INTEGRITY)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
