pub mod logging;

pub mod security {
    pub mod certs;
    pub mod endpoint_config;
}

pub mod services {
    pub mod auth;
    pub mod directory;
}
