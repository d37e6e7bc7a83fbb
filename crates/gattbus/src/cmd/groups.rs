use std::time::Duration;

use gattbus_frame::function_name;
use gattbus_protocol::{ReadGroup, GROUPS};
use serde::Serialize;

use crate::cmd::GroupsArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, schema_id, table, OutputFormat};

#[derive(Serialize)]
struct GroupRow {
    name: &'static str,
    function_code: u8,
    function: &'static str,
    start_address: u16,
    quantity: u16,
    nominal_period_ms: u128,
    degraded_period_ms: u128,
    single_register: bool,
    optional: bool,
}

#[derive(Serialize)]
struct GroupsOutput {
    schema_id: String,
    groups: Vec<GroupRow>,
}

impl From<&ReadGroup> for GroupRow {
    fn from(group: &ReadGroup) -> Self {
        Self {
            name: group.id.name(),
            function_code: group.function_code,
            function: function_name(group.function_code),
            start_address: group.start_address,
            quantity: group.quantity,
            nominal_period_ms: group.nominal_period.as_millis(),
            degraded_period_ms: group.degraded_period.as_millis(),
            single_register: group.id.is_single_register(),
            optional: group.id.is_optional(),
        }
    }
}

pub fn run(_args: GroupsArgs, format: OutputFormat) -> CliResult<i32> {
    let out = GroupsOutput {
        schema_id: schema_id("groups"),
        groups: GROUPS.iter().map(GroupRow::from).collect(),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut rendered = table(vec![
                "GROUP", "FC", "START", "QTY", "PERIOD", "DEGRADED", "OPTIONAL",
            ]);
            for group in &GROUPS {
                rendered.add_row(vec![
                    group.id.name().to_string(),
                    format!("0x{:02X}", group.function_code),
                    format!("0x{:04X}", group.start_address),
                    group.quantity.to_string(),
                    human(group.nominal_period),
                    human(group.degraded_period),
                    group.id.is_optional().to_string(),
                ]);
            }
            println!("{rendered}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for group in &GROUPS {
                println!(
                    "{:<17} fc=0x{:02X} start=0x{:04X} qty={:<2} every {} ({} degraded)",
                    group.id.name(),
                    group.function_code,
                    group.start_address,
                    group.quantity,
                    human(group.nominal_period),
                    human(group.degraded_period),
                );
            }
        }
    }
    Ok(SUCCESS)
}

fn human(period: Duration) -> String {
    if period.subsec_millis() == 0 {
        format!("{}s", period.as_secs())
    } else {
        format!("{}ms", period.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use gattbus_protocol::GroupId;

    use super::*;

    #[test]
    fn periods_render_compactly() {
        assert_eq!(human(Duration::from_millis(500)), "500ms");
        assert_eq!(human(Duration::from_secs(30)), "30s");
        assert_eq!(human(Duration::from_millis(1500)), "1500ms");
    }

    #[test]
    fn rows_follow_the_table() {
        let row = GroupRow::from(GroupId::DeviceInfo.descriptor());
        assert_eq!(row.name, "device_info");
        assert!(row.optional);
        assert_eq!(row.nominal_period_ms, 30_000);
    }
}
