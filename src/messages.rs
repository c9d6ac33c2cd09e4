//! Patient-facing message texts. Wording is fixed Brazilian Portuguese.

use chrono::{NaiveDate, NaiveTime};

use crate::{
    channel::MessageContent,
    models::{Appointment, AppointmentKind, MessageKind, Tenant},
};

pub const CANCELLATION_ACK: &str = "Agradecemos o seu retorno. O agendamento foi desmarcado. \
Caso queira marcar um novo agendamento, entre em contato com a unidade básica de saúde da sua região.";

const REPROMPT_PREFIX: &str =
    "Não conseguimos identificar a sua resposta. Responda \"Sim\" para confirmar ou \"Não\" para desmarcar.";

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

pub fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn request_text(appointment: &Appointment, tenant: &Tenant) -> String {
    let date = format_date(appointment.date);
    let time = format_time(appointment.time);
    match appointment.kind {
        AppointmentKind::Consultation => format!(
            "Bom dia!\nSua consulta referente a {} está agendada para o dia {date}, às {time}. \
Deseja confirmar a consulta?",
            appointment.specialty
        ),
        AppointmentKind::Procedure => {
            let mut text = format!(
                "Bom dia!\nO seu procedimento referente a {} está agendado para o dia {date}, às {time}. \
Deseja confirmar o procedimento?",
                appointment.specialty
            );
            let needs_preparation = appointment
                .procedure_code
                .as_deref()
                .is_some_and(|code| tenant.documents.requires_preparation(code));
            if needs_preparation {
                text.push_str(
                    "\nEste procedimento exige preparo. As orientações serão enviadas após a confirmação.",
                );
            }
            text
        }
    }
}

fn template_variables(appointment: &Appointment) -> Vec<String> {
    vec![
        appointment.patient_name.clone(),
        format_date(appointment.date),
        format_time(appointment.time),
    ]
}

/// The reminder asking the patient to confirm. Uses the tenant's template when
/// one is configured.
pub fn confirmation_request(appointment: &Appointment, tenant: &Tenant) -> MessageContent {
    match tenant.templates.template_for(MessageKind::ConfirmationRequest) {
        Some(template_id) => MessageContent::Template {
            template_id: template_id.to_string(),
            variables: template_variables(appointment),
        },
        None => MessageContent::text(request_text(appointment, tenant)),
    }
}

pub fn reprompt(appointment: &Appointment, tenant: &Tenant) -> MessageContent {
    match tenant.templates.template_for(MessageKind::Reprompt) {
        Some(template_id) => MessageContent::Template {
            template_id: template_id.to_string(),
            variables: template_variables(appointment),
        },
        None => MessageContent::text(format!(
            "{REPROMPT_PREFIX}\n\n{}",
            request_text(appointment, tenant)
        )),
    }
}

pub fn fallback(tenant: &Tenant) -> MessageContent {
    let text = match tenant.support_contact.as_deref() {
        Some(contact) => format!(
            "Não foi possível confirmar o agendamento. Por gentileza, entre em contato pelo telefone {contact}."
        ),
        None => "Não foi possível confirmar o agendamento. Por gentileza, entre em contato com a unidade de saúde."
            .to_string(),
    };
    MessageContent::text(text)
}

pub fn confirmation_ack(appointment: &Appointment, preparation_link: Option<&str>) -> MessageContent {
    let mut text = format!(
        "Agradecemos o seu retorno. O agendamento foi realizado para a data {}, às {}.",
        format_date(appointment.date),
        format_time(appointment.time)
    );
    if let Some(link) = preparation_link {
        text.push_str(&format!(" Segue o preparo do exame: {link}"));
    }
    MessageContent::text(text)
}

pub fn cancellation_ack() -> MessageContent {
    MessageContent::text(CANCELLATION_ACK)
}
