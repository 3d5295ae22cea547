/**
 * Email Templates
 * Branded HTML layout shared by every outgoing email
 */

/// Rendered email content, ready for the provider.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Entity-escape text for HTML and XML alike (`&#39;` is valid in both).
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn button(url: &str, label: &str) -> String {
    format!(
        r#"<p style="text-align:center;margin:32px 0;">
  <a href="{}" style="background:#e63946;color:#ffffff;padding:14px 28px;border-radius:6px;text-decoration:none;font-weight:bold;">{}</a>
</p>"#,
        escape_html(url),
        escape_html(label)
    )
}

/// Wrap `body_html` in the site layout. Newsletter mail always passes an
/// unsubscribe link; transactional replies do not.
pub fn layout(
    site_name: &str,
    site_url: &str,
    title: &str,
    body_html: &str,
    unsubscribe_url: Option<&str>,
) -> String {
    let footer = match unsubscribe_url {
        Some(url) => format!(
            r#"<p>Vous recevez cet email car vous êtes inscrit à la newsletter {}.<br>
<a href="{}" style="color:#888888;">Se désinscrire</a></p>"#,
            escape_html(site_name),
            escape_html(url)
        ),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="fr">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body style="margin:0;padding:0;background:#111111;font-family:Helvetica,Arial,sans-serif;">
<table role="presentation" width="100%" cellpadding="0" cellspacing="0">
<tr><td align="center" style="padding:24px;">
<table role="presentation" width="600" cellpadding="0" cellspacing="0" style="background:#ffffff;border-radius:8px;">
<tr><td style="background:#000000;padding:24px;text-align:center;border-radius:8px 8px 0 0;">
<a href="{site_url}" style="color:#ffffff;font-size:24px;font-weight:bold;text-decoration:none;letter-spacing:2px;">{site_name}</a>
</td></tr>
<tr><td style="padding:32px;color:#222222;font-size:16px;line-height:1.6;">
<h1 style="font-size:22px;margin-top:0;">{title}</h1>
{body_html}
</td></tr>
<tr><td style="padding:24px;text-align:center;color:#888888;font-size:12px;">
{footer}
<p>&copy; {site_name}</p>
</td></tr>
</table>
</td></tr>
</table>
</body>
</html>"#,
        title = escape_html(title),
        site_url = escape_html(site_url),
        site_name = escape_html(site_name),
        body_html = body_html,
        footer = footer,
    )
}

pub fn confirmation(
    site_name: &str,
    site_url: &str,
    confirm_url: &str,
    unsubscribe_url: &str,
) -> RenderedEmail {
    let title = "Confirmez votre inscription";
    let body = format!(
        "<p>Merci de votre intérêt pour la newsletter {}&nbsp;!</p>\n\
         <p>Pour recevoir nos articles et nos meilleurs deals, confirmez votre adresse email en cliquant sur le bouton ci-dessous.</p>\n\
         {}\n\
         <p style=\"font-size:13px;color:#666666;\">Si vous n'êtes pas à l'origine de cette demande, ignorez simplement cet email.</p>",
        escape_html(site_name),
        button(confirm_url, "Confirmer mon inscription"),
    );
    RenderedEmail {
        subject: format!("{} - {}", title, site_name),
        html: layout(site_name, site_url, title, &body, Some(unsubscribe_url)),
    }
}

pub fn welcome(site_name: &str, site_url: &str, unsubscribe_url: &str) -> RenderedEmail {
    let title = "Bienvenue dans la communauté";
    let body = format!(
        "<p>Votre inscription est confirmée. Chaque semaine, retrouvez le meilleur de {} : articles, interviews et deals sélectionnés.</p>\n{}",
        escape_html(site_name),
        button(site_url, "Découvrir le site"),
    );
    RenderedEmail {
        subject: format!("Bienvenue sur {}", site_name),
        html: layout(site_name, site_url, title, &body, Some(unsubscribe_url)),
    }
}

/// `content_html` must already be sanitized.
pub fn broadcast(
    site_name: &str,
    site_url: &str,
    subject: &str,
    content_html: &str,
    unsubscribe_url: &str,
) -> RenderedEmail {
    RenderedEmail {
        subject: subject.to_string(),
        html: layout(site_name, site_url, subject, content_html, Some(unsubscribe_url)),
    }
}

pub fn reply_notification(
    site_name: &str,
    site_url: &str,
    recipient_name: &str,
    original_subject: &str,
    reply_content: &str,
) -> RenderedEmail {
    let title = format!("Re: {}", original_subject);
    let paragraphs: String = reply_content
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .map(|p| format!("<p>{}</p>\n", escape_html(p.trim()).replace('\n', "<br>")))
        .collect();
    let body = format!(
        "<p>Bonjour {},</p>\n{}<p>L'équipe {}</p>",
        escape_html(recipient_name),
        paragraphs,
        escape_html(site_name)
    );
    RenderedEmail {
        subject: title.clone(),
        html: layout(site_name, site_url, &title, &body, None),
    }
}
