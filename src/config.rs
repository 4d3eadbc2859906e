//! Settings loaded from the environment (optionally via a `.env` file).

use std::env;
use std::net::SocketAddr;

use crate::errors::{AppError, AppResult};

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub redis_url: Option<String>,

    pub minio_endpoint: Option<String>,
    pub minio_access_key: Option<String>,
    pub minio_secret_key: Option<String>,
    pub minio_secure: bool,

    pub object_store_root: Option<String>,

    pub jwt_secret_key: String,
    pub jwt_access_token_expires: u64,
    pub jwt_refresh_token_expires: u64,

    pub ocr_server_url: String,
    pub vlm_server_url: String,
    pub vlm_model: String,
    pub llm_server_url: String,
    pub llm_model: String,

    pub ocr_worker_count: usize,
    pub render_dpi: f32,
    pub render_long_edge_px: u32,

    pub bind_addr: SocketAddr,
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_required(key: &str) -> AppResult<String> {
    env_opt(key).ok_or_else(|| AppError::internal(format!("missing required env var {key}")))
}

fn env_default(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Settings {
    /// Load and validate configuration from the process environment.
    ///
    /// A `.env` file, if present, is loaded by `main` before this runs and
    /// never overrides variables already set in the environment.
    pub fn load() -> AppResult<Self> {
        let database_url = env_required("DATABASE_URL")?;
        let redis_url = env_opt("REDIS_URL");

        let minio_endpoint = env_opt("MINIO_ENDPOINT");
        let minio_access_key = env_opt("MINIO_ACCESS_KEY");
        let minio_secret_key = env_opt("MINIO_SECRET_KEY");
        let minio_secure = env_parsed("MINIO_SECURE", true);

        let object_store_root = env_opt("PRICETRACK_OBJECT_STORE_ROOT");
        if minio_endpoint.is_none() && object_store_root.is_none() {
            return Err(AppError::internal(
                "either MINIO_ENDPOINT or PRICETRACK_OBJECT_STORE_ROOT must be set",
            ));
        }

        let jwt_secret_key = env_required("JWT_SECRET_KEY")?;
        let jwt_access_token_expires = env_parsed("JWT_ACCESS_TOKEN_EXPIRES", 900);
        let jwt_refresh_token_expires = env_parsed("JWT_REFRESH_TOKEN_EXPIRES", 604_800);

        let ocr_server_url = env_required("OCR_SERVER_URL")?;
        let vlm_server_url = env_default("VLM_SERVER_URL", &ocr_server_url);
        let vlm_model = env_default("VLM_MODEL", "vlm");
        let llm_server_url = env_default("LLM_SERVER_URL", &ocr_server_url);
        let llm_model = env_default("LLM_MODEL", "llm");

        let ocr_worker_count = env_parsed("OCR_WORKER_COUNT", 8usize).clamp(1, 16);
        let render_dpi = env_parsed("RENDER_DPI", 200.0f32);
        let render_long_edge_px = env_parsed("RENDER_LONG_EDGE_PX", 1540u32);

        let bind_addr: SocketAddr = env_default("PRICETRACK_BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .map_err(|e| AppError::internal(format!("invalid PRICETRACK_BIND_ADDR: {e}")))?;

        Ok(Settings {
            database_url,
            redis_url,
            minio_endpoint,
            minio_access_key,
            minio_secret_key,
            minio_secure,
            object_store_root,
            jwt_secret_key,
            jwt_access_token_expires,
            jwt_refresh_token_expires,
            ocr_server_url,
            vlm_server_url,
            vlm_model,
            llm_server_url,
            llm_model,
            ocr_worker_count,
            render_dpi,
            render_long_edge_px,
            bind_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment mutation races across tests in the same process; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "DATABASE_URL",
            "REDIS_URL",
            "MINIO_ENDPOINT",
            "PRICETRACK_OBJECT_STORE_ROOT",
            "JWT_SECRET_KEY",
            "OCR_SERVER_URL",
            "OCR_WORKER_COUNT",
            "PRICETRACK_BIND_ADDR",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_database_url_fails() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(Settings::load().is_err());
    }

    #[test]
    fn requires_object_store_target() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("DATABASE_URL", "sqlite://test.db");
        env::set_var("JWT_SECRET_KEY", "secret");
        env::set_var("OCR_SERVER_URL", "http://localhost:9000");
        assert!(Settings::load().is_err());
        env::set_var("PRICETRACK_OBJECT_STORE_ROOT", "/tmp/pricetrack-objects");
        assert!(Settings::load().is_ok());
    }

    #[test]
    fn worker_count_is_clamped() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("DATABASE_URL", "sqlite://test.db");
        env::set_var("JWT_SECRET_KEY", "secret");
        env::set_var("OCR_SERVER_URL", "http://localhost:9000");
        env::set_var("PRICETRACK_OBJECT_STORE_ROOT", "/tmp/pricetrack-objects");
        env::set_var("OCR_WORKER_COUNT", "99");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.ocr_worker_count, 16);
    }
}
