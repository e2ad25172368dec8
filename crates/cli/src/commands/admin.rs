use std::env;
use std::sync::Arc;

use lawnpeak_client::HttpBookingApi;
use lawnpeak_core::audit::TracingAuditSink;
use lawnpeak_core::{AdminDesk, AdminError, CustomerId, CustomerRecord};
use secrecy::SecretString;
use serde_json::{json, Value};

use crate::commands::{load_config, runtime, CommandResult};

pub const ADMIN_PASSWORD_ENV: &str = "LAWNPEAK_ADMIN_PASSWORD";

enum DeskAction {
    List,
    Charge(CustomerId),
}

pub fn list(password: Option<String>) -> CommandResult {
    with_desk("admin.list", password, DeskAction::List)
}

pub fn charge(password: Option<String>, customer: &str) -> CommandResult {
    with_desk("admin.charge", password, DeskAction::Charge(CustomerId(customer.trim().to_string())))
}

async fn perform(
    desk: &mut AdminDesk,
    api: &HttpBookingApi,
    action: &DeskAction,
) -> Result<(String, Value), AdminError> {
    match action {
        DeskAction::List => {
            let customers = desk.refresh(api).await?;
            let rows: Vec<Value> = customers.iter().map(customer_json).collect();
            Ok((format!("{} customers", rows.len()), Value::Array(rows)))
        }
        DeskAction::Charge(customer_id) => {
            desk.refresh(api).await?;
            let receipt = desk.collect_payment(api, customer_id).await?;
            let data = json!({
                "customer_id": receipt.customer_id.0,
                "payment_intent_id": receipt.payment_intent_id,
                "amount": receipt.amount.minor(),
                "status": receipt.status,
                "charged_at": receipt.charged_at.to_rfc3339(),
            });
            Ok((format!("charged {} to {}", receipt.amount, receipt.customer_id.0), data))
        }
    }
}

fn with_desk(command: &str, password: Option<String>, action: DeskAction) -> CommandResult {
    let Some(password) = password.or_else(|| env::var(ADMIN_PASSWORD_ENV).ok()) else {
        return CommandResult::failure(
            command,
            "admin_auth",
            format!("admin password required (pass --password or set {ADMIN_PASSWORD_ENV})"),
            2,
        );
    };
    let password = SecretString::from(password);

    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let api = match HttpBookingApi::from_config(&config.api) {
        Ok(api) => api,
        Err(error) => return CommandResult::failure(command, "client_init", error.to_string(), 3),
    };

    let mut desk = AdminDesk::new(Arc::new(TracingAuditSink));
    let result = runtime.block_on(async {
        desk.login(&api, &password).await?;
        perform(&mut desk, &api, &action).await
    });

    match result {
        Ok((message, data)) => CommandResult::success_with_data(command, message, Some(data)),
        Err(error) => CommandResult::failure(
            command,
            admin_error_class(&error),
            format!("{} ({error})", error.user_message()),
            exit_code(&error),
        ),
    }
}

fn customer_json(customer: &CustomerRecord) -> Value {
    json!({
        "id": customer.id.0,
        "name": customer.name,
        "email": customer.email,
        "address": customer.address,
        "lot_size": customer.lot_size,
        "service_type": customer.service_type,
        "price": customer.price.map(|price| price.minor()),
        "has_payment_method": customer.has_payment_method,
        "charged": customer.charged,
        "charge_date": customer.charge_date.map(|date| date.to_rfc3339()),
    })
}

fn admin_error_class(error: &AdminError) -> &'static str {
    match error {
        AdminError::NotAuthenticated | AdminError::InvalidPassword => "admin_auth",
        AdminError::UnknownCustomer(_) => "unknown_customer",
        AdminError::AlreadyCharged(_)
        | AdminError::NoPaymentMethod(_)
        | AdminError::NoAmount(_) => "not_chargeable",
        AdminError::InFlight => "in_flight",
        AdminError::Collaborator(_) => "collaborator",
    }
}

fn exit_code(error: &AdminError) -> u8 {
    match error {
        AdminError::Collaborator(_) => 5,
        _ => 4,
    }
}
