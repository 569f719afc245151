use node::{ClusterConfig, HaltSignal};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match ClusterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("node: invalid configuration: {e:?}");
            std::process::exit(1);
        }
    };

    // No signal-handling crate is part of this stack, so the halt signal
    // is only ever set from within `node::run`'s own loop exit paths today.
    let halt = HaltSignal::new();

    if let Err(e) = node::run(&config, &halt) {
        eprintln!("node: fatal error: {e:?}");
        std::process::exit(1);
    }
}
