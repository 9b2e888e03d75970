use std::net::IpAddr;

use crate::cli::Cli;
use mock_api_server::{CliError, Error, MockServer};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_address: IpAddr,
    pub start_immediately: bool,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, Error> {
        let address = cli.bind_address.trim();
        let bind_address = address.parse::<IpAddr>().map_err(|e| {
            Error::Cli(CliError::InvalidBindAddress {
                address: cli.bind_address.clone(),
                source: e,
            })
        })?;

        Ok(Config {
            port: cli.port,
            bind_address,
            start_immediately: cli.start,
        })
    }

    pub fn into_server(self) -> MockServer {
        MockServer::new(self.port).with_bind_address(self.bind_address)
    }
}
