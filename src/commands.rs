pub mod registers {
    use std::path::PathBuf;

    use csv_core::WriteResult;

    use crate::registers::{Mode, Value};

    #[derive(clap::ValueEnum, Clone, Debug)]
    pub enum Format {
        Table,
        Json,
        Csv,
    }

    /// Search and output the register map of the rig.
    #[derive(clap::Parser)]
    pub struct Args {
        #[arg(long, short='f', value_enum, default_value_t = Format::Table)]
        format: Format,
        filter: Option<String>,
        #[arg(long, short = 'o')]
        file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not open the specified output file at {1:?}")]
        OpenOutputFile(#[source] std::io::Error, PathBuf),
        #[error("could not write data to the output file at {1:?}")]
        WriteFile(#[source] std::io::Error, PathBuf),
        #[error("could not write data to the terminal")]
        WriteStdout(#[source] std::io::Error),
        #[error("could not serialize registers to JSON")]
        SerializeJson(#[source] serde_json::Error),
    }

    #[derive(serde::Serialize)]
    pub struct RegisterSchema {
        pub address: u16,
        pub name: &'static str,
        pub mode: Mode,
        pub signed: bool,
        pub scale: u8,
        pub minimum: Option<Value>,
        pub maximum: Option<Value>,
        pub description: &'static str,
    }

    impl RegisterSchema {
        pub fn all_registers() -> impl Iterator<Item = Self> {
            use crate::registers::*;
            use std::iter::zip;
            zip(
                zip(
                    zip(
                        zip(zip(zip(ADDRESSES, NAMES), MODES), DATA_TYPES),
                        MINIMUM_VALUES,
                    ),
                    MAXIMUM_VALUES,
                ),
                DESCRIPTIONS,
            )
            .map(
                |(
                    (((((&address, &name), &mode), &data_type), &minimum), &maximum),
                    &description,
                )| {
                    RegisterSchema {
                        address,
                        name,
                        mode,
                        signed: data_type.is_signed(),
                        scale: data_type.scale(),
                        minimum,
                        maximum,
                        description,
                    }
                },
            )
        }

        pub fn is_match(&self, pattern: &str) -> bool {
            let pattern = pattern.to_uppercase();
            if self.name.contains(&pattern) {
                return true;
            }
            if self.description.to_uppercase().contains(&pattern) {
                return true;
            }
            if self.address.to_string().contains(&pattern) {
                return true;
            }
            return false;
        }

        fn row(&self) -> Vec<String> {
            vec![
                self.address.to_string(),
                self.name.to_string(),
                self.mode.to_string(),
                if self.signed { "i16".to_string() } else { "u16".to_string() },
                self.scale.to_string(),
                self.minimum.map(|v| v.to_string()).unwrap_or_default(),
                self.maximum.map(|v| v.to_string()).unwrap_or_default(),
                self.description.to_string(),
            ]
        }
    }

    fn csv_row(rows: &mut Vec<u8>, values: &[String]) {
        let max_len = 2 + 2 * values.iter().map(|v| v.len()).max().unwrap_or(0);
        let mut output = vec![0; max_len];
        let mut writer = csv_core::Writer::new();
        for value in values {
            let (WriteResult::InputEmpty, _, ob) = writer.field(value.as_bytes(), &mut output)
            else {
                panic!("something wrong with csv output");
            };
            rows.extend(&output[..ob]);
            let (WriteResult::InputEmpty, ob) = writer.delimiter(&mut output) else {
                panic!("something wrong with csv output");
            };
            rows.extend(&output[..ob]);
        }
        let (WriteResult::InputEmpty, ob) = writer.terminator(&mut output) else {
            panic!("something wrong with csv output");
        };
        rows.extend(&output[..ob]);
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let mut output_writer: Box<dyn std::io::Write> = match &args.file {
            None => Box::new(std::io::stdout().lock()) as Box<_>,
            Some(path) => Box::new(
                std::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| Error::OpenOutputFile(e, path.clone()))?,
            ) as Box<_>,
        };

        let matching = RegisterSchema::all_registers().filter(|register| {
            args.filter.as_ref().is_none_or(|pattern| register.is_match(pattern))
        });
        let header =
            ["Address", "Name", "Mode", "Type", "Scale", "Min", "Max", "Description"];
        let data = match args.format {
            Format::Table => {
                let mut table = comfy_table::Table::new();
                table
                    .set_header(header.to_vec())
                    .set_content_arrangement(comfy_table::ContentArrangement::Dynamic);
                for register in matching {
                    table.add_row(register.row());
                }
                table.to_string().into_bytes()
            }
            Format::Json => {
                let value = matching.collect::<Vec<_>>();
                serde_json::to_vec(&value).map_err(Error::SerializeJson)?
            }
            Format::Csv => {
                let mut bytes = Vec::new();
                csv_row(&mut bytes, &header.map(str::to_string));
                for register in matching {
                    csv_row(&mut bytes, &register.row());
                }
                bytes
            }
        };
        output_writer.write_all(&data).map_err(|e| match args.file {
            None => Error::WriteStdout(e),
            Some(p) => Error::WriteFile(e, p),
        })?;
        Ok(())
    }
}

pub mod serve {
    use crate::server::{self, ControllableServer};

    /// Run the controllable server until interrupted.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        server: server::Args,

        /// Start with test mode already enabled.
        #[arg(long)]
        test_mode: bool,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not start the async runtime")]
        CreateRuntime(#[source] std::io::Error),
        #[error("could not start the server")]
        Start(#[source] server::Error),
        #[error("could not listen for the interrupt signal")]
        CtrlC(#[source] std::io::Error),
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(Error::CreateRuntime)?;
        runtime.block_on(async move {
            let server = ControllableServer::start(args.server).await.map_err(Error::Start)?;
            if args.test_mode {
                server.enable_test_mode();
            }
            tokio::signal::ctrl_c().await.map_err(Error::CtrlC)?;
            server.stop().await;
            Ok(())
        })
    }
}
