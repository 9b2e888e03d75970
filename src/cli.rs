use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "mock-api-server")]
#[command(about = "Mock API server driven by a test runner over stdin/stdout")]
pub struct Cli {
    /// Port the mock API listens on
    #[arg(long, short = 'p', env = "MOCK_API_PORT", default_value = "9000")]
    pub port: u16,

    /// Address the mock API binds to
    #[arg(long, env = "MOCK_API_BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    #[arg(
        long,
        default_value_t = false,
        help = "Start serving immediately instead of waiting for the onRunStart command"
    )]
    pub start: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
