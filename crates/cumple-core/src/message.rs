/// Reminder sent for each upcoming birthday.
pub const DEFAULT_TEMPLATE: &str = "🎉 *Recordatorio de Cumpleaños*\n\
👤 *{name}* ({role})\n\
📅 {date}\n\
\n\
¡Felicidades anticipadas! 🎂🎈";

/// Fill `{name}`, `{role}` and `{date}` in `template`.
pub fn render(template: &str, name: &str, role: &str, date: &str) -> String {
    template
        .replace("{name}", name)
        .replace("{role}", role)
        .replace("{date}", date)
}
