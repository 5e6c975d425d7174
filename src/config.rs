use rand::{distributions::Alphanumeric, Rng};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuración de conexión a un nodo remoto.
///
/// Toda la configuración se entrega programáticamente al crear el nodo;
/// no hay estado en disco.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Dirección del servidor remoto.
    pub host: String,
    /// Puerto del servidor remoto.
    pub port: u16,
    /// Secreto compartido enviado en la cabecera `Authorization`.
    pub password: String,
    /// Si se usa TLS (wss/https) para ambos transportes.
    pub secure: bool,
    /// Etiqueta de región para el algoritmo de selección por cercanía.
    pub region: Option<String>,
    /// Identificador único del nodo. Si es `None` se genera uno.
    pub identifier: Option<String>,
    /// ID de usuario del cliente, enviado en la cabecera `User-Id`.
    pub user_id: u64,
    /// Capacidades declaradas por este nodo (ej: "spotify" si hay
    /// credenciales de proveedor configuradas).
    pub capabilities: Vec<String>,
    /// Credenciales opacas por proveedor. La librería no las interpreta,
    /// solo deriva capacidades de sus claves.
    pub provider_credentials: HashMap<String, String>,
    /// Timeout del handshake WebSocket por intento.
    pub connect_timeout: Duration,
    /// Timeout de cada llamada REST.
    pub rest_timeout: Duration,
    /// Ventana de gracia para reanudar una sesión caída antes de marcar
    /// muertos los players.
    pub resume_timeout: Duration,
    /// Límite de intentos de conexión inicial.
    pub max_retries: u32,
    /// Intervalo de ping del WebSocket.
    pub heartbeat: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2333,
            password: "youshallnotpass".to_string(),
            secure: false,
            region: None,
            identifier: None,
            user_id: 0,
            capabilities: Vec::new(),
            provider_credentials: HashMap::new(),
            connect_timeout: Duration::from_secs(10),
            rest_timeout: Duration::from_secs(15),
            resume_timeout: Duration::from_secs(60),
            max_retries: 5,
            heartbeat: Duration::from_secs(60),
        }
    }
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            ..Self::default()
        }
    }

    /// Devuelve todas las capacidades: las declaradas más las derivadas de
    /// las credenciales de proveedor.
    pub fn effective_capabilities(&self) -> Vec<String> {
        let mut caps = self.capabilities.clone();
        for provider in self.provider_credentials.keys() {
            if !caps.iter().any(|c| c == provider) {
                caps.push(provider.clone());
            }
        }
        caps
    }

    /// URI del WebSocket del nodo.
    pub fn websocket_uri(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// URI base del endpoint REST del nodo.
    pub fn rest_uri(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Resuelve el identificador definitivo: valida el explícito o genera
    /// uno aleatorio de 8 caracteres alfanuméricos.
    pub(crate) fn resolve_identifier(&self) -> Result<String> {
        match &self.identifier {
            Some(id) => {
                if valid_identifier(id) {
                    Ok(id.clone())
                } else {
                    Err(Error::InvalidIdentifier(id.clone()))
                }
            }
            None => Ok(rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(8)
                .map(char::from)
                .collect()),
        }
    }
}

fn valid_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
