use std::str::FromStr;

use lawnpeak_core::pricing::PricingTrace;
use lawnpeak_core::{DiscountRate, LotSizeTier, PricingError, PricingTable, ServiceFrequency};
use rust_decimal::Decimal;

use crate::commands::{load_config, CommandResult};

pub fn run(
    lot_size: &str,
    frequency: &str,
    referral_discount: Option<&str>,
    json: bool,
) -> CommandResult {
    let config = match load_config("price") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let table = PricingTable::from_config(&config.pricing);

    let trace = parse_selection(lot_size, frequency, referral_discount)
        .and_then(|(lot_size, frequency, referral)| {
            table.explain(Some(lot_size), Some(frequency), referral)
        });
    let trace = match trace {
        Ok(trace) => trace,
        Err(error) => {
            return CommandResult::failure(
                "price",
                "pricing",
                format!("{} ({error})", error.user_message()),
                2,
            )
        }
    };

    if json {
        let data = serde_json::to_value(&trace).ok();
        return CommandResult::success_with_data("price", trace.total.to_string(), data);
    }
    CommandResult { exit_code: 0, output: render_trace(&trace) }
}

pub fn table(json: bool) -> CommandResult {
    let config = match load_config("table") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let rows = match PricingTable::from_config(&config.pricing).price_grid() {
        Ok(rows) => rows,
        Err(error) => return CommandResult::failure("table", "pricing", error.to_string(), 2),
    };

    if json {
        let data = serde_json::to_value(&rows).ok();
        return CommandResult::success_with_data(
            "table",
            format!("{} prices", rows.len()),
            data,
        );
    }

    let mut lines = vec![format!("{:<8} {:<10} {:>9} {:>9}", "lot", "frequency", "price", "savings")];
    lines.extend(rows.iter().map(|row| {
        format!(
            "{:<8} {:<10} {:>9} {:>9}",
            row.lot_size.code(),
            row.frequency.code(),
            row.price.to_string(),
            row.savings.to_string()
        )
    }));
    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn parse_selection(
    lot_size: &str,
    frequency: &str,
    referral_discount: Option<&str>,
) -> Result<(LotSizeTier, ServiceFrequency, Option<DiscountRate>), PricingError> {
    let lot_size = LotSizeTier::from_str(lot_size)?;
    let frequency = ServiceFrequency::from_str(frequency)?;
    let referral = match referral_discount {
        Some(raw) => {
            let value = Decimal::from_str(raw.trim())
                .map_err(|_| PricingError::InvalidDiscount(raw.to_string()))?;
            Some(DiscountRate::new(value)?)
        }
        None => None,
    };
    Ok((lot_size, frequency, referral))
}

fn render_trace(trace: &PricingTrace) -> String {
    let mut lines = vec![format!("{} / {}", trace.lot_size.label(), trace.frequency.label())];
    lines.extend(
        trace
            .steps
            .iter()
            .map(|step| format!("- {:<18} {:>9}  {}", step.stage, step.amount.to_string(), step.detail)),
    );
    lines.push(format!("total: {}", trace.total));
    lines.join("\n")
}
