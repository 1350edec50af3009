//! HTML pages of the web frontend

use crate::domain::{Account, MatrixUser};

const SUPPORT_EMAIL: &str = "me@steffo.eu";
const GOOGLE_LOGOUT: &str = "https://accounts.google.com/logout";

/// Escape text interpolated into HTML
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"it\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{} - Loki</title>\n\
         </head>\n\
         <body>\n\
         <main>\n{}\n</main>\n\
         </body>\n\
         </html>\n",
        escape(title),
        body
    )
}

pub fn root() -> String {
    layout(
        "Benvenuto",
        "<h1>Loki</h1>\n\
         <p>Loki collega il tuo account Matrix al tuo account Google <i>studenti@UniMoRe</i>, \
         e ti fa entrare nello spazio degli studenti.</p>\n\
         <p>Per iniziare, entra nella stanza di benvenuto su Matrix: riceverai in privato il link \
         alla tua pagina personale.</p>",
    )
}

/// Page of a Matrix user, reachable through their token
pub fn profile(user: &MatrixUser, account: Option<&Account>, token: &str) -> String {
    let link_url = format!("/matrix/{}/link", urlencoding::encode(token));

    let status = match account {
        Some(account) => format!(
            "<p>Questo account è collegato a <b>{}</b> ({}).</p>\n\
             <p>Se vuoi collegarlo a un altro account, <a href=\"{}\">rifai il collegamento</a>.</p>",
            escape(&account.display_name()),
            escape(&account.email),
            escape(&link_url)
        ),
        None => format!(
            "<p>Questo account non è ancora collegato a nessun account <i>studenti@UniMoRe</i>.</p>\n\
             <p><a href=\"{}\">Collega il tuo account Google</a></p>",
            escape(&link_url)
        ),
    };

    layout(
        "Il tuo account",
        &format!("<h1>{}</h1>\n{}", escape(&user.id), status),
    )
}

/// Static error page
pub fn error(when: &str, details: &str, tip: &str) -> String {
    layout(
        "Errore",
        &format!(
            "<h1>Si è verificato un errore {}</h1>\n<p>{}</p>\n<p>{}</p>",
            escape(when),
            escape(details),
            tip
        ),
    )
}

fn retry_tip() -> String {
    format!(
        "Rifai la procedura di connessione account da capo.<br>Se il problema persiste, \
         inviami un'email a <a href=\"mailto:{0}\">{0}</a>, e provvederò a risolvere il problema!",
        SUPPORT_EMAIL
    )
}

fn wrong_account_tip() -> String {
    format!(
        "Probabilmente hai effettuato l'accesso con l'account Google sbagliato.<br>Effettua il \
         <a href=\"{}\">logout da tutti i tuoi account Google</a> e riprova!",
        GOOGLE_LOGOUT
    )
}

pub fn missing_parameters() -> String {
    error(
        "durante la verifica del login con Google",
        "Mancano i parametri necessari per effettuare l'autenticazione OAuth2.",
        &retry_tip(),
    )
}

pub fn oauth_failed() -> String {
    error(
        "durante la verifica del login con Google",
        "Qualcosa è inaspettatamente andato storto durante l'autenticazione OAuth2.",
        &retry_tip(),
    )
}

pub fn email_not_verified() -> String {
    error(
        "durante la verifica del tuo account Google",
        "L'email del tuo account Google non è verificata.",
        &wrong_account_tip(),
    )
}

pub fn wrong_organization() -> String {
    error(
        "durante la verifica del tuo account Google",
        "Questo account Google non appartiene all'organizzazione studenti@UniMoRe.",
        &wrong_account_tip(),
    )
}

pub fn no_matrix_user() -> String {
    error(
        "durante il collegamento dell'account",
        "Il tuo account Google è stato verificato, ma non sappiamo a quale account Matrix collegarlo.",
        "Apri il link che il bot ti ha mandato su Matrix e riprova da lì.",
    )
}

pub fn not_found() -> String {
    error(
        "durante la ricerca della pagina",
        "Questo link non corrisponde a nessun account Matrix.",
        "Controlla di aver copiato per intero il link che il bot ti ha mandato su Matrix.",
    )
}

pub fn internal_error() -> String {
    error(
        "inaspettato",
        "Qualcosa è andato storto da parte nostra.",
        &retry_tip(),
    )
}
