use gattbus_frame::{function_name, parse_hex, to_hex, READ_INPUT_REGISTERS};
use gattbus_protocol::{
    decode_status, parse_frame, DeviceStatusSnapshot, ParsedFrame, STATUS_REGISTER_COUNT,
};
use serde::Serialize;

use crate::cmd::ParseArgs;
use crate::exit::{frame_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty_fields, schema_id, OutputFormat};

#[derive(Serialize)]
struct ParseOutput {
    schema_id: String,
    frame: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    registers: Option<Vec<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value_or_quantity: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<DeviceStatusSnapshot>,
}

pub fn run(args: ParseArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex).map_err(|err| frame_error("invalid input", err))?;
    let hex = to_hex(&bytes);
    let mut out = ParseOutput {
        schema_id: schema_id("parse"),
        frame: hex.clone(),
        kind: "invalid",
        function: None,
        registers: None,
        address: None,
        value_or_quantity: None,
        reason: None,
        status: None,
    };

    match parse_frame(&bytes) {
        ParsedFrame::ReadResponse {
            function_code,
            registers,
            ..
        } => {
            out.kind = "read_response";
            out.function = Some(function_name(function_code));
            // An eleven-register input read is the status block.
            if function_code == READ_INPUT_REGISTERS && registers.len() == STATUS_REGISTER_COUNT {
                out.status = decode_status(&registers, &hex).ok();
            }
            out.registers = Some(registers);
        }
        ParsedFrame::WriteAck {
            function_code,
            address,
            value_or_quantity,
            ..
        } => {
            out.kind = "write_ack";
            out.function = Some(function_name(function_code));
            out.address = Some(address);
            out.value_or_quantity = Some(value_or_quantity);
        }
        ParsedFrame::Invalid { reason, .. } => {
            out.reason = Some(reason.to_string());
        }
    }

    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(&out),
        OutputFormat::Table => print_fields(&rows(&out)),
        OutputFormat::Pretty => print_pretty_fields(&rows(&out)),
    }

    Ok(if out.reason.is_some() {
        DATA_INVALID
    } else {
        SUCCESS
    })
}

fn rows(out: &ParseOutput) -> Vec<(&'static str, String)> {
    let mut rows = vec![("frame", out.frame.clone()), ("kind", out.kind.to_string())];
    if let Some(function) = out.function {
        rows.push(("function", function.to_string()));
    }
    if let Some(registers) = &out.registers {
        let words: Vec<String> = registers.iter().map(|r| format!("0x{r:04X}")).collect();
        rows.push(("registers", words.join(" ")));
    }
    if let Some(address) = out.address {
        rows.push(("address", format!("0x{address:04X}")));
    }
    if let Some(value) = out.value_or_quantity {
        rows.push(("value_or_quantity", value.to_string()));
    }
    if let Some(reason) = &out.reason {
        rows.push(("reason", reason.clone()));
    }
    if let Some(status) = &out.status {
        rows.push(("run_state", format!("{:?}", status.run_state)));
        rows.push(("voltage", format!("{:.1} V", status.voltage)));
        rows.push(("level", status.level.to_string()));
        rows.push(("rpm", status.rpm.to_string()));
        rows.push((
            "temperatures",
            format!("{} / {} C", status.temperature_a, status.temperature_b),
        ));
        rows.push(("error_code", status.error_code.to_string()));
    }
    rows
}
