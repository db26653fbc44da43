//! Agent dashboard delivery. The SPA is either built into `FRONTEND_DIR`
//! or served by a dev server that we proxy to.

use std::path::Path;

use axum::Router;
use axum_reverse_proxy::ReverseProxy;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::FrontendMode;

/// Mount the dashboard behind every route the API leaves unclaimed.
///
/// `router` must already have its state applied.
pub fn with_frontend_fallback(router: Router, mode: &FrontendMode) -> Router {
    match mode {
        FrontendMode::Proxy { target } => {
            tracing::info!(%target, "proxying dashboard requests to dev server");
            router.merge(Router::from(ReverseProxy::new("/", target)))
        }
        FrontendMode::Static { dir } => match dashboard_files(Path::new(dir)) {
            Some(files) => {
                tracing::info!(dir = %dir, "serving built dashboard");
                router.fallback_service(files)
            }
            None => {
                tracing::warn!(dir = %dir, "dashboard build missing, serving API only");
                router
            }
        },
        FrontendMode::Disabled => router,
    }
}

/// Static files with `index.html` standing in for client-side routes.
fn dashboard_files(dir: &Path) -> Option<ServeDir<ServeFile>> {
    dir.is_dir()
        .then(|| ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))))
}
