//! Portuguese (pt-BR) notification content for appointment and contact
//! messages. Rendering is pure string work so the outbox stores the
//! final body and nothing downstream needs appointment context.

use chrono::{Datelike, NaiveDate};

/// The appointment fields the templates need, already validated.
#[derive(Debug, Clone)]
pub struct AppointmentSummary<'a> {
    pub patient_name: &'a str,
    pub service_type: &'a str,
    /// `YYYY-MM-DD`
    pub appointment_date: &'a str,
    /// `HH:MM`
    pub appointment_time: &'a str,
}

#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

const WEEKDAYS_PT: [&str; 7] = [
    "segunda-feira",
    "terça-feira",
    "quarta-feira",
    "quinta-feira",
    "sexta-feira",
    "sábado",
    "domingo",
];

/// `2026-03-15` -> `domingo, 15/03/2026`. Falls back to the raw string
/// when the date does not parse; the template is not the place to fail.
fn format_date_pt(date: &str) -> String {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => {
            let weekday = WEEKDAYS_PT[parsed.weekday().num_days_from_monday() as usize];
            format!("{weekday}, {}", parsed.format("%d/%m/%Y"))
        }
        Err(_) => date.to_string(),
    }
}

pub fn confirmation_email(appointment: &AppointmentSummary<'_>) -> RenderedEmail {
    RenderedEmail {
        subject: "Agendamento confirmado".to_string(),
        html: format!(
            "<p>Olá, {name}!</p>\
             <p>Seu agendamento de <strong>{service}</strong> foi confirmado \
             para <strong>{date}</strong> às <strong>{time}</strong>.</p>\
             <p>Em caso de imprevisto, entre em contato para reagendar.</p>",
            name = appointment.patient_name,
            service = appointment.service_type,
            date = format_date_pt(appointment.appointment_date),
            time = appointment.appointment_time,
        ),
    }
}

pub fn confirmation_sms(appointment: &AppointmentSummary<'_>) -> String {
    format!(
        "Olá, {name}! Seu agendamento de {service} foi confirmado para {date} às {time}.",
        name = appointment.patient_name,
        service = appointment.service_type,
        date = format_date_pt(appointment.appointment_date),
        time = appointment.appointment_time,
    )
}

pub fn reminder_email(appointment: &AppointmentSummary<'_>, hours_before: i64) -> RenderedEmail {
    RenderedEmail {
        subject: format!("Lembrete: seu agendamento é em {hours_before}h"),
        html: format!(
            "<p>Olá, {name}!</p>\
             <p>Lembrete: seu agendamento de <strong>{service}</strong> é \
             <strong>{date}</strong> às <strong>{time}</strong>.</p>\
             <p>Chegue com alguns minutos de antecedência. Até breve!</p>",
            name = appointment.patient_name,
            service = appointment.service_type,
            date = format_date_pt(appointment.appointment_date),
            time = appointment.appointment_time,
        ),
    }
}

pub fn reminder_sms(appointment: &AppointmentSummary<'_>, hours_before: i64) -> String {
    format!(
        "Lembrete: seu agendamento de {service} é em {hours_before}h, {date} às {time}.",
        service = appointment.service_type,
        date = format_date_pt(appointment.appointment_date),
        time = appointment.appointment_time,
    )
}

pub fn cancellation_email(appointment: &AppointmentSummary<'_>) -> RenderedEmail {
    RenderedEmail {
        subject: "Agendamento cancelado".to_string(),
        html: format!(
            "<p>Olá, {name}.</p>\
             <p>Seu agendamento de <strong>{service}</strong> em \
             <strong>{date}</strong> às <strong>{time}</strong> foi cancelado.</p>\
             <p>Quando quiser, agende um novo horário pelo nosso site.</p>",
            name = appointment.patient_name,
            service = appointment.service_type,
            date = format_date_pt(appointment.appointment_date),
            time = appointment.appointment_time,
        ),
    }
}

pub fn cancellation_sms(appointment: &AppointmentSummary<'_>) -> String {
    format!(
        "{name}, seu agendamento de {service} em {date} às {time} foi cancelado.",
        name = appointment.patient_name,
        service = appointment.service_type,
        date = format_date_pt(appointment.appointment_date),
        time = appointment.appointment_time,
    )
}

/// Internal notification sent to the clinic inbox for each contact form
/// submission.
pub fn contact_email(
    name: &str,
    email: &str,
    phone: Option<&str>,
    message: &str,
) -> RenderedEmail {
    let phone_line = phone
        .map(|value| format!("<p><strong>Telefone:</strong> {value}</p>"))
        .unwrap_or_default();

    RenderedEmail {
        subject: format!("Novo contato pelo site: {name}"),
        html: format!(
            "<p><strong>Nome:</strong> {name}</p>\
             <p><strong>E-mail:</strong> {email}</p>\
             {phone_line}\
             <p><strong>Mensagem:</strong></p>\
             <p>{message}</p>",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppointmentSummary<'static> {
        AppointmentSummary {
            patient_name: "Maria Silva",
            service_type: "Limpeza de pele",
            appointment_date: "2026-03-16",
            appointment_time: "14:30",
        }
    }

    #[test]
    fn formats_date_with_portuguese_weekday() {
        // 2026-03-16 is a Monday.
        assert_eq!(format_date_pt("2026-03-16"), "segunda-feira, 16/03/2026");
    }

    #[test]
    fn unparseable_date_passes_through() {
        assert_eq!(format_date_pt("amanhã"), "amanhã");
    }

    #[test]
    fn confirmation_email_mentions_service_and_time() {
        let rendered = confirmation_email(&sample());
        assert_eq!(rendered.subject, "Agendamento confirmado");
        assert!(rendered.html.contains("Limpeza de pele"));
        assert!(rendered.html.contains("14:30"));
        assert!(rendered.html.contains("16/03/2026"));
    }

    #[test]
    fn reminder_sms_includes_lead_time() {
        let sms = reminder_sms(&sample(), 24);
        assert!(sms.contains("24h"));
        assert!(sms.contains("14:30"));
    }

    #[test]
    fn contact_email_omits_missing_phone() {
        let rendered = contact_email("João", "joao@example.com", None, "Olá!");
        assert!(!rendered.html.contains("Telefone"));

        let rendered = contact_email("João", "joao@example.com", Some("+5533999990000"), "Olá!");
        assert!(rendered.html.contains("+5533999990000"));
    }
}
