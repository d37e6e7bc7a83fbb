use gattbus_frame::{append_crc, crc16, parse_hex, to_hex, verify};
use serde::Serialize;

use crate::cmd::CrcArgs;
use crate::exit::{frame_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{
    print_fields, print_json, print_pretty_fields, print_raw, schema_id, OutputFormat,
};

#[derive(Serialize)]
struct CrcOutput {
    schema_id: String,
    payload: String,
    crc: String,
    frame: String,
}

#[derive(Serialize)]
struct CheckOutput {
    schema_id: String,
    frame: String,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: CrcArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex).map_err(|err| frame_error("invalid input", err))?;
    if args.check {
        return check(&bytes, format);
    }

    let framed = append_crc(&bytes);
    let out = CrcOutput {
        schema_id: schema_id("crc"),
        payload: to_hex(&bytes),
        crc: format!("0x{:04X}", crc16(&bytes)),
        frame: to_hex(&framed),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields(&out)),
        OutputFormat::Pretty => print_pretty_fields(&fields(&out)),
        OutputFormat::Raw => print_raw(&framed),
    }
    Ok(SUCCESS)
}

fn fields(out: &CrcOutput) -> Vec<(&'static str, String)> {
    vec![
        ("payload", out.payload.clone()),
        ("crc", out.crc.clone()),
        ("frame", out.frame.clone()),
    ]
}

fn check(frame: &[u8], format: OutputFormat) -> CliResult<i32> {
    let result = verify(frame);
    let out = CheckOutput {
        schema_id: schema_id("crc-check"),
        frame: to_hex(frame),
        valid: result.is_ok(),
        error: result.err().map(|err| err.to_string()),
    };

    let mut rows = vec![("frame", out.frame.clone()), ("valid", out.valid.to_string())];
    if let Some(error) = &out.error {
        rows.push(("error", error.clone()));
    }
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&rows),
        OutputFormat::Pretty => print_pretty_fields(&rows),
        OutputFormat::Raw => println!("{}", if out.valid { "valid" } else { "invalid" }),
    }

    Ok(if out.valid { SUCCESS } else { DATA_INVALID })
}
