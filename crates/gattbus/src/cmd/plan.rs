use std::path::Path;

use gattbus_frame::to_hex;
use gattbus_protocol::{build_write_transactions, DeviceSettings, WriteTransaction};
use serde::Serialize;

use crate::cmd::PlanArgs;
use crate::exit::{io_error, json_error, protocol_error, CliResult, SUCCESS};
use crate::output::{print_json, print_raw, schema_id, table, OutputFormat};

#[derive(Serialize)]
struct Step {
    title: &'static str,
    request: String,
    ack_function: u8,
    ack_address: u16,
    ack_value_or_quantity: u16,
    readback: &'static str,
    check_offset: usize,
    check_expected: Vec<u16>,
}

#[derive(Serialize)]
struct PlanOutput {
    schema_id: String,
    settings: DeviceSettings,
    transactions: Vec<Step>,
}

impl From<&WriteTransaction> for Step {
    fn from(tx: &WriteTransaction) -> Self {
        Self {
            title: tx.title,
            request: to_hex(&tx.request),
            ack_function: tx.expected_ack.function,
            ack_address: tx.expected_ack.address,
            ack_value_or_quantity: tx.expected_ack.value_or_quantity,
            readback: tx.readback.name(),
            check_offset: tx.check.offset,
            check_expected: tx.check.expected.clone(),
        }
    }
}

/// Load settings JSON; missing fields take their defaults.
pub fn load_settings(path: Option<&Path>) -> CliResult<DeviceSettings> {
    let Some(path) = path else {
        return Ok(DeviceSettings::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| json_error(&format!("parse {}", path.display()), err))
}

pub fn run(args: PlanArgs, format: OutputFormat) -> CliResult<i32> {
    let settings = load_settings(args.settings.as_deref())?;
    let transactions =
        build_write_transactions(&settings).map_err(|err| protocol_error("settings", err))?;

    match format {
        OutputFormat::Json => print_json(&PlanOutput {
            schema_id: schema_id("plan"),
            settings,
            transactions: transactions.iter().map(Step::from).collect(),
        }),
        OutputFormat::Table => {
            let mut rendered = table(vec!["#", "TRANSACTION", "REQUEST", "READ-BACK", "EXPECT"]);
            for (index, tx) in transactions.iter().enumerate() {
                rendered.add_row(vec![
                    (index + 1).to_string(),
                    tx.title.to_string(),
                    to_hex(&tx.request),
                    tx.readback.name().to_string(),
                    expectation(tx),
                ]);
            }
            println!("{rendered}");
        }
        OutputFormat::Pretty => {
            for (index, tx) in transactions.iter().enumerate() {
                println!("{}. {}", index + 1, tx.title);
                println!("   send    {}", to_hex(&tx.request));
                println!("   read    {}", tx.readback);
                println!("   expect  {}", expectation(tx));
            }
        }
        OutputFormat::Raw => {
            for tx in &transactions {
                print_raw(&tx.request);
            }
        }
    }
    Ok(SUCCESS)
}

fn expectation(tx: &WriteTransaction) -> String {
    let words: Vec<String> = tx
        .check
        .expected
        .iter()
        .map(|word| format!("0x{word:04X}"))
        .collect();
    format!("[{}] at +{}", words.join(" "), tx.check.offset)
}
