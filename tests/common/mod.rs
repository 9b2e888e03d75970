use mock_api_server::MockServer;

/// Start a mock server on an ephemeral port
#[allow(dead_code)]
pub async fn start_mock_server() -> anyhow::Result<MockServer> {
    let mut server = MockServer::new(0);
    server.start().await?;
    Ok(server)
}

/// Base URL of a running mock server
#[allow(dead_code)]
pub fn base_url(server: &MockServer) -> String {
    server
        .base_url()
        .expect("mock server should be running")
}

/// Reserve a port that is free right now
#[allow(dead_code)]
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
