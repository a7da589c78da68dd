use tracing_subscriber::{filter::Directive, EnvFilter};

pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    for directive in ["ingestion_service=info", "series_client=info"] {
        if let Ok(d) = directive.parse::<Directive>() {
            filter = filter.add_directive(d);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
