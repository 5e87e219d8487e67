use std::path::PathBuf;

use clap::Args;
use hopwire_route::{validate_port, DEFAULT_HOP_COUNT, DEFAULT_MAX_CONNECTIONS};

use crate::exit::{CliError, CliResult};

pub mod relay;

#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Open a named-pipe route reading INBOUND and writing OUTBOUND.
    #[arg(
        short = 'F',
        long = "fifo-pml",
        value_names = ["INBOUND", "OUTBOUND"],
        num_args = 0..=2
    )]
    pub fifo: Option<Vec<String>>,

    /// Accept TCP routes on PORT and identify every peer (server mode).
    #[arg(short = 'S', long = "server", value_name = "PORT", num_args = 0..=1)]
    pub server: Option<Vec<String>>,

    /// Open a TCP route to HOST PORT.
    #[arg(
        short = 'C',
        long = "connect",
        value_names = ["HOST", "PORT"],
        num_args = 0..=2
    )]
    pub connect: Option<Vec<String>>,

    /// Address the -S listener binds to.
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub bind: String,

    /// Exit after printing N local messages.
    #[arg(long)]
    pub count: Option<usize>,

    /// Hop count for broadcasts that arrive without one.
    #[arg(long, default_value_t = DEFAULT_HOP_COUNT)]
    pub hop_count: u32,

    /// Maximum simultaneous connections accepted by -S.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Identifier to answer identification queries with.
    #[arg(long)]
    pub node_id: Option<u32>,
}

/// One transport requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Pipe { inbound: PathBuf, outbound: PathBuf },
    Listen { bind: String, port: u16 },
    Connect { host: String, port: u16 },
}

impl RelayArgs {
    /// Validate the transport options. Fails with a usage error naming the
    /// option and the position of the first missing parameter.
    pub fn transports(&self) -> CliResult<Vec<Transport>> {
        let mut transports = Vec::new();

        if let Some(values) = &self.fifo {
            let [inbound, outbound] = required("-F", values, ["inbound-file", "outbound-file"])?;
            transports.push(Transport::Pipe {
                inbound: PathBuf::from(inbound),
                outbound: PathBuf::from(outbound),
            });
        }
        if let Some(values) = &self.server {
            let [port] = required("-S", values, ["port"])?;
            transports.push(Transport::Listen {
                bind: self.bind.clone(),
                port: parse_port("-S", port)?,
            });
        }
        if let Some(values) = &self.connect {
            let [host, port] = required("-C", values, ["host", "port"])?;
            transports.push(Transport::Connect {
                host: host.to_string(),
                port: parse_port("-C", port)?,
            });
        }

        if transports.is_empty() {
            return Err(CliError::usage(
                "no transport given; use -F <inbound-file> <outbound-file>, -S <port> or -C <host> <port>",
            ));
        }
        Ok(transports)
    }

    pub fn server_mode(&self) -> bool {
        self.server.is_some()
    }
}

fn required<'a, const N: usize>(
    option: &str,
    values: &'a [String],
    names: [&str; N],
) -> CliResult<[&'a str; N]> {
    let mut out = [""; N];
    for (position, name) in names.iter().enumerate() {
        match values.get(position) {
            Some(value) => out[position] = value.as_str(),
            None => {
                return Err(CliError::usage(format!(
                    "missing parameters for {option}: expected <{name}> at position {}",
                    position + 1
                )));
            }
        }
    }
    Ok(out)
}

fn parse_port(option: &str, raw: &str) -> CliResult<u16> {
    let port: u32 = raw
        .parse()
        .map_err(|_| CliError::usage(format!("invalid port '{raw}' for {option}")))?;
    validate_port(port).map_err(|err| CliError::usage(format!("{option}: {err}")))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::exit::USAGE;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        relay: RelayArgs,
    }

    fn parse(args: &[&str]) -> RelayArgs {
        let mut argv = vec!["hopwire"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv)
            .expect("arguments should parse")
            .relay
    }

    #[test]
    fn all_three_transports() {
        let args = parse(&["-F", "in", "out", "-S", "7000", "-C", "example.org", "7001"]);
        assert!(args.server_mode());
        assert_eq!(
            args.transports().unwrap(),
            vec![
                Transport::Pipe {
                    inbound: "in".into(),
                    outbound: "out".into()
                },
                Transport::Listen {
                    bind: "0.0.0.0".to_string(),
                    port: 7000
                },
                Transport::Connect {
                    host: "example.org".to_string(),
                    port: 7001
                },
            ]
        );
    }

    #[test]
    fn missing_parameter_names_option_and_position() {
        let err = parse(&["-C", "localhost"]).transports().unwrap_err();
        assert_eq!(err.code, USAGE);
        assert_eq!(
            err.message,
            "missing parameters for -C: expected <port> at position 2"
        );

        let err = parse(&["-F"]).transports().unwrap_err();
        assert!(err.message.contains("-F"));
        assert!(err.message.contains("position 1"));

        let err = parse(&["-S"]).transports().unwrap_err();
        assert!(err.message.contains("-S"));
    }

    #[test]
    fn ports_are_range_checked() {
        for port in ["0", "65536", "http"] {
            let err = parse(&["-S", port]).transports().unwrap_err();
            assert_eq!(err.code, USAGE, "port {port}");
        }
        assert!(parse(&["-S", "65535"]).transports().is_ok());
    }

    #[test]
    fn no_transport_is_usage_error() {
        let err = parse(&[]).transports().unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(!parse(&["-C", "h", "1"]).server_mode());
    }
}
