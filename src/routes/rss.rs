/**
 * RSS Feed
 * RSS 2.0 feed of the latest published blog posts
 */
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};

use crate::config::CONFIG;
use crate::email::templates::escape_html;
use crate::error::ApiError;
use crate::routes::pool;

const FEED_SIZE: i64 = 50;

/// Row shape of the feed query
pub struct FeedItem {
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
}

fn rfc822(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

/// Render the channel; `site_url` has no trailing slash.
pub fn render_feed(site_name: &str, site_url: &str, items: &[FeedItem]) -> String {
    let mut entries = String::new();
    for item in items {
        let link = format!("{}/blog/{}", site_url, item.slug);
        entries.push_str(&format!(
            "    <item>\n      <title>{}</title>\n      <link>{}</link>\n      <description>{}</description>\n      <category>{}</category>\n      <pubDate>{}</pubDate>\n      <guid isPermaLink=\"true\">{}</guid>\n    </item>\n",
            escape_html(&item.title),
            escape_html(&link),
            escape_html(&item.excerpt),
            escape_html(&item.category),
            rfc822(&item.published_at),
            escape_html(&link),
        ));
    }

    let last_build = items
        .first()
        .map(|i| rfc822(&i.published_at))
        .unwrap_or_else(|| rfc822(&Utc::now()));

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>{}</title>
    <link>{}</link>
    <description>{}</description>
    <language>fr-fr</language>
    <atom:link href="{}" rel="self" type="application/rss+xml"/>
    <lastBuildDate>{}</lastBuildDate>
{}  </channel>
</rss>"#,
        escape_html(site_name),
        escape_html(&format!("{}/blog", site_url)),
        escape_html(&format!("Les derniers articles de {}", site_name)),
        escape_html(&format!("{}/rss.xml", site_url)),
        last_build,
        entries,
    )
}

/// GET /rss.xml
pub async fn rss_feed() -> Result<impl IntoResponse, ApiError> {
    let pool = pool()?;

    let rows: Vec<(String, String, String, String, Option<DateTime<Utc>>, DateTime<Utc>)> =
        sqlx::query_as(
            r#"
            SELECT title, slug, excerpt, category, published_at, created_at
            FROM blog_posts
            WHERE is_published = true
            ORDER BY published_at DESC NULLS LAST, created_at DESC
            LIMIT $1
            "#,
        )
        .bind(FEED_SIZE)
        .fetch_all(pool.as_ref())
        .await?;

    let items: Vec<FeedItem> = rows
        .into_iter()
        .map(|(title, slug, excerpt, category, published_at, created_at)| FeedItem {
            title,
            slug,
            excerpt,
            category,
            published_at: published_at.unwrap_or(created_at),
        })
        .collect();

    let xml = render_feed(&CONFIG.site_name, &CONFIG.site_url, &items);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/rss+xml; charset=utf-8"),
            (
                header::CACHE_CONTROL,
                "public, max-age=3600, stale-while-revalidate=600",
            ),
        ],
        xml,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_feed_text_uses_shared_escaper() {
        assert_eq!(escape_html("a & b"), "a &amp; b");
        assert_eq!(escape_html("<title>"), "&lt;title&gt;");
        assert_eq!(escape_html("l'été"), "l&#39;été");
    }

    #[test]
    fn test_rfc822_format() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        assert_eq!(rfc822(&dt), "Mon, 15 Jan 2024 12:00:00 +0000");
    }

    #[test]
    fn test_feed_links_posts_and_escapes_titles() {
        let items = vec![FeedItem {
            title: "Sneakers & culture".to_string(),
            slug: "sneakers-culture".to_string(),
            excerpt: "Un résumé".to_string(),
            category: "culture".to_string(),
            published_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap(),
        }];
        let xml = render_feed("Camino TV", "https://caminotv.fr", &items);
        assert!(xml.contains("<title>Sneakers &amp; culture</title>"));
        assert!(xml.contains("<link>https://caminotv.fr/blog/sneakers-culture</link>"));
        assert!(xml.contains("<lastBuildDate>Fri, 01 Mar 2024 08:30:00 +0000</lastBuildDate>"));
        assert_eq!(xml.matches("<item>").count(), 1);
    }

    #[test]
    fn test_empty_feed_is_well_formed() {
        let xml = render_feed("Camino TV", "https://caminotv.fr", &[]);
        assert!(xml.starts_with("<?xml"));
        assert!(!xml.contains("<item>"));
        assert!(xml.trim_end().ends_with("</rss>"));
    }
}
