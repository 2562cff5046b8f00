use callmesh_core::IceServerConfig;

/// ICE configuration handed to every new peer connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
        }
    }
}

impl TransportConfig {
    pub fn with_ice_server(mut self, server: IceServerConfig) -> Self {
        self.ice_servers.push(server);
        self
    }
}
