use invize_auth::configuration::get_configuration;
use invize_auth::startup::{run, AppState, Stores};
use invize_auth::telemetry::init_telemetry;
use std::net::TcpListener;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    tracing::info!(backend = ?configuration.database.backend, "Opening session store");
    let stores = Stores::connect(&configuration).await.map_err(|e| {
        tracing::error!("Failed to open session store: {}", e);
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Session store error")
    })?;

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let state = AppState::new(&configuration, stores);
    let server = run(listener, state, &configuration)?;
    tracing::info!("Server started successfully");

    server.await
}
