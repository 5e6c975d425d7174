//! Registro de nodos y algoritmos de selección.

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::player::Player;

/// Registro de los nodos conocidos por la aplicación.
///
/// Es una instancia con dueño, no un singleton: la aplicación decide cuántos
/// pools tiene y quién los comparte. El orden de registro desempata todas las
/// selecciones.
#[derive(Default)]
pub struct NodePool {
    nodes: RwLock<Vec<Node>>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea un nodo desde su configuración, lo conecta y lo registra.
    ///
    /// El identificador debe ser único dentro del pool; una colisión falla
    /// con [`Error::NodeOccupied`] sin tocar la red. Si el identificador se
    /// omite se genera uno.
    pub async fn create_node(&self, config: NodeConfig) -> Result<Node> {
        let node = Node::new(config)?;
        self.check_vacant(node.identifier())?;

        node.connect().await?;

        // Otro registro pudo colarse durante el handshake.
        {
            let mut nodes = self.nodes.write();
            if nodes.iter().any(|n| n.identifier() == node.identifier()) {
                drop(nodes);
                node.disconnect();
                return Err(Error::NodeOccupied(node.identifier().to_string()));
            }
            nodes.push(node.clone());
        }
        info!("📡 Nodo {} registrado en el pool", node.identifier());
        Ok(node)
    }

    fn check_vacant(&self, identifier: &str) -> Result<()> {
        if self
            .nodes
            .read()
            .iter()
            .any(|n| n.identifier() == identifier)
        {
            return Err(Error::NodeOccupied(identifier.to_string()));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert(&self, node: Node) -> Result<()> {
        self.check_vacant(node.identifier())?;
        self.nodes.write().push(node);
        Ok(())
    }

    /// Quita un nodo del registro y lo desconecta.
    pub fn remove_node(&self, identifier: &str) -> Result<()> {
        let mut nodes = self.nodes.write();
        let index = nodes
            .iter()
            .position(|n| n.identifier() == identifier)
            .ok_or_else(|| Error::InvalidIdentifier(identifier.to_string()))?;
        let node = nodes.remove(index);
        drop(nodes);
        node.disconnect();
        Ok(())
    }

    /// Desconecta todos los nodos y vacía el registro.
    pub fn disconnect_all(&self) {
        let nodes: Vec<Node> = self.nodes.write().drain(..).collect();
        for node in &nodes {
            node.disconnect();
        }
        if !nodes.is_empty() {
            info!("🔌 Pool desconectado ({} nodos)", nodes.len());
        }
    }

    /// Snapshot de los nodos registrados, en orden de registro.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    fn connected(&self) -> Result<Vec<Node>> {
        let nodes: Vec<Node> = self
            .nodes
            .read()
            .iter()
            .filter(|n| n.is_connected())
            .cloned()
            .collect();
        if nodes.is_empty() {
            return Err(Error::NoNodesConnected);
        }
        Ok(nodes)
    }

    /// Busca un nodo por identificador exacto.
    pub fn identifier(&self, identifier: &str) -> Result<Node> {
        self.nodes
            .read()
            .iter()
            .find(|n| n.identifier() == identifier)
            .cloned()
            .ok_or_else(|| Error::InvalidIdentifier(identifier.to_string()))
    }

    /// Nodo conectado con menos players. Empata por orden de registro.
    pub fn min_players(&self) -> Result<Node> {
        let nodes = self.connected()?;
        nodes
            .into_iter()
            .min_by_key(Node::player_count)
            .ok_or(Error::NoNodesConnected)
    }

    /// Nodo conectado con menor penalización de carga.
    ///
    /// Los nodos que todavía no reportaron estadísticas puntúan como
    /// infinitamente cargados, así que solo ganan cuando ningún nodo reportó.
    /// Empata por orden de registro.
    pub fn balanced(&self) -> Result<Node> {
        let nodes = self.connected()?;
        let mut best: Option<(f64, Node)> = None;
        for node in nodes {
            let penalty = node.penalty();
            match &best {
                Some((lowest, _)) if penalty >= *lowest => {}
                _ => best = Some((penalty, node)),
            }
        }
        best.map(|(_, node)| node).ok_or(Error::NoNodesConnected)
    }

    /// Nodo conectado en la región dada, el menos cargado si hay varios.
    /// Sin coincidencias, cae al balanceo global.
    pub fn closest_node(&self, region: &str) -> Result<Node> {
        let nodes = self.connected()?;
        let mut best: Option<(f64, Node)> = None;
        for node in nodes {
            if node.region() != Some(region) {
                continue;
            }
            let penalty = node.penalty();
            match &best {
                Some((lowest, _)) if penalty >= *lowest => {}
                _ => best = Some((penalty, node)),
            }
        }
        match best {
            Some((_, node)) => Ok(node),
            None => {
                warn!("🌐 Sin nodos en la región {region}, usando balanceo global");
                self.balanced()
            }
        }
    }

    /// Nodo conectado que declara la capacidad dada, el menos cargado si hay
    /// varios. Sin coincidencias falla con [`Error::InvalidNodeSearch`].
    pub fn by_capability(&self, capability: &str) -> Result<Node> {
        let nodes = self.connected()?;
        let mut best: Option<(f64, Node)> = None;
        for node in nodes {
            if !node.has_capability(capability) {
                continue;
            }
            let penalty = node.penalty();
            match &best {
                Some((lowest, _)) if penalty >= *lowest => {}
                _ => best = Some((penalty, node)),
            }
        }
        best.map(|(_, node)| node).ok_or_else(|| {
            Error::InvalidNodeSearch(format!(
                "ningún nodo conectado declara la capacidad {capability}"
            ))
        })
    }

    /// Busca el player de un guild en cualquier nodo del pool.
    pub fn get_player(&self, guild_id: u64) -> Option<Player> {
        self.nodes
            .read()
            .iter()
            .find_map(|n| n.get_player(guild_id))
    }
}
