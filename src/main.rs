use tiktok_recipe_backend::config::Settings;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tiktok_recipe_backend=info,tower_http=info".to_string()),
        )
        .init();

    let result = match Settings::from_env() {
        Ok(settings) => tiktok_recipe_backend::run(settings).await,
        Err(error) => Err(error.into()),
    };

    if let Err(error) = result {
        eprintln!("Erreur serveur : {error}");
        std::process::exit(1);
    }
}
