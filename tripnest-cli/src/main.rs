//! tripnest-cli: terminal client for the TripNest resource coordinator
//!
//! Talks to the daemon's HTTP API. Every subcommand is one or two requests;
//! the daemon owns the cache, so repeated commands are served from it.
//!
//! # Subcommands
//! - `status`                       : daemon health
//! - `login <email> <password>`     : sign in (or `--sign-up` to register)
//! - `logout`                       : sign out
//! - `itineraries [--search] [--filter]`
//! - `itinerary <id>`               : itinerary with activities per day
//! - `wishlist`
//! - `discover [--more]`            : discover feed, optionally loading a batch first
//! - `favorite <id> <true|false>`
//! - `delete <id>`

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8787";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "tripnest-cli", version, about = "TripNest travel planner CLI")]
struct Cli {
    /// TripNest HTTP server URL (overrides TRIPNEST_HTTP_URL env var)
    #[arg(long, env = "TRIPNEST_HTTP_URL", default_value = DEFAULT_SERVER)]
    server: String,

    /// Print raw JSON responses
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show TripNest daemon status
    Status,

    /// Sign in with email and password
    Login {
        email: String,
        password: String,

        /// Register a new account instead of signing in
        #[arg(long)]
        sign_up: bool,

        /// Display name for a new account
        #[arg(long, requires = "sign_up")]
        name: Option<String>,
    },

    /// Sign out
    Logout,

    /// List your itineraries
    Itineraries {
        /// Case-insensitive destination search
        #[arg(short, long)]
        search: Option<String>,

        /// all, favorites, or a trip type (leisure, business, adventure, ...)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Show one itinerary with its activities grouped by day
    Itinerary { id: String },

    /// Show your wishlist
    Wishlist,

    /// Show the discover feed
    Discover {
        /// Load one more batch before printing
        #[arg(long)]
        more: bool,
    },

    /// Mark or unmark an itinerary as favorite
    Favorite {
        id: String,
        #[arg(action = clap::ArgAction::Set)]
        value: bool,
    },

    /// Delete an itinerary and its activities
    Delete { id: String },
}

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItinerarySummary {
    pub id: String,
    pub title: String,
    pub destination: String,
    #[serde(rename = "type", default)]
    pub trip_type: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

#[derive(Debug, Deserialize)]
pub struct ItineraryList {
    pub itineraries: Vec<ItinerarySummary>,
    pub total: usize,
    pub shown: usize,
}

#[derive(Debug, Deserialize)]
pub struct ActivityLine {
    #[serde(default)]
    pub time: String,
    pub title: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct Day {
    pub date: String,
    pub activities: Vec<ActivityLine>,
}

#[derive(Debug, Deserialize)]
pub struct ItineraryDetail {
    pub itinerary: ItinerarySummary,
    pub days: Vec<Day>,
}

#[derive(Debug, Deserialize)]
pub struct PhotoLine {
    pub id: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

// ============================================================================
// Formatting
// ============================================================================

pub fn format_itinerary(it: &ItinerarySummary) -> String {
    let star = if it.is_favorite { "★" } else { " " };
    let kind = it.trip_type.as_deref().unwrap_or("-");
    format!("{} {}  {} ({}) [{}]", star, it.id, it.title, it.destination, kind)
}

pub fn format_day(day: &Day) -> Vec<String> {
    let mut lines = vec![day.date.clone()];
    for a in &day.activities {
        let time = if a.time.is_empty() { "--:--" } else { a.time.as_str() };
        if a.location.is_empty() {
            lines.push(format!("  {}  {}", time, a.title));
        } else {
            lines.push(format!("  {}  {} @ {}", time, a.title, a.location));
        }
    }
    lines
}

pub fn format_photo(photo: &PhotoLine, in_wishlist: bool) -> String {
    let heart = if in_wishlist { "♥" } else { " " };
    let place = photo.location.as_deref().unwrap_or("Unknown place");
    let category = photo.category.as_deref().unwrap_or("General");
    let description: String = photo
        .description
        .as_deref()
        .unwrap_or("")
        .chars()
        .take(120)
        .collect();
    format!("{} {}  {} [{}]\n    {}", heart, photo.id, place, category, description)
}

// ============================================================================
// HTTP Client Calls
// ============================================================================

struct Api {
    server: String,
    client: reqwest::blocking::Client,
}

impl Api {
    fn new(server: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            server: server.to_string(),
            client,
        })
    }

    fn get(&self, path: &str) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.server, path);
        let resp = self.client.get(&url).send();
        Self::read(&url, resp)
    }

    fn invoke(&self, mutation: Value) -> anyhow::Result<Value> {
        let url = format!("{}/invoke", self.server);
        let resp = self.client.post(&url).json(&mutation).send();
        let body = Self::read(&url, resp)?;
        Ok(body["value"].clone())
    }

    fn read(url: &str, resp: reqwest::Result<reqwest::blocking::Response>) -> anyhow::Result<Value> {
        let resp = match resp {
            Ok(r) => r,
            Err(e) => anyhow::bail!("connection failed to {}: {}", url, e),
        };
        let status = resp.status();
        let body: Value = resp.json().unwrap_or_default();
        if !status.is_success() {
            let message = body["error"]
                .as_str()
                .map(str::to_string)
                .or_else(|| body["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("server returned {}: {}", status, message);
        }
        Ok(body)
    }
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn query_string(search: Option<&str>, filter: Option<&str>) -> String {
    let params: Vec<String> = [("search", search), ("filter", filter)]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| format!("{}={}", k, encode_component(v))))
        .collect();
    if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    }
}

fn encode_component(s: &str) -> String {
    s.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}

fn do_status(api: &Api, json_output: bool) -> anyhow::Result<()> {
    let body = api.get("/health")?;
    if json_output {
        return print_json(&body);
    }
    println!("TripNest server: {}", body["status"].as_str().unwrap_or("unknown"));
    println!("Version:         {}", body["version"].as_str().unwrap_or("?"));
    println!("Store:           {}", body["store"].as_str().unwrap_or("?"));
    println!("Auth:            {}", body["auth"].as_str().unwrap_or("?"));
    println!("Signed in:       {}", body["signed_in"].as_bool().unwrap_or(false));
    println!("Cache entries:   {}", body["cache"]["entries"]);
    println!("Socket:          {}", body["socket"].as_str().unwrap_or("?"));
    Ok(())
}

fn do_login(
    api: &Api,
    email: &str,
    password: &str,
    sign_up: bool,
    name: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let credentials = json!({ "email": email, "password": password });
    let mutation = if sign_up {
        json!({ "type": "sign_up", "credentials": credentials, "display_name": name })
    } else {
        json!({ "type": "sign_in", "credentials": credentials })
    };
    let value = api.invoke(mutation)?;
    if json_output {
        return print_json(&value);
    }
    let user = &value["user"];
    println!(
        "Signed in as {} ({})",
        user["email"].as_str().unwrap_or(email),
        user["uid"].as_str().unwrap_or("?")
    );
    Ok(())
}

fn do_logout(api: &Api) -> anyhow::Result<()> {
    api.invoke(json!({ "type": "sign_out" }))?;
    println!("Signed out");
    Ok(())
}

fn do_itineraries(
    api: &Api,
    search: Option<&str>,
    filter: Option<&str>,
    json_output: bool,
) -> anyhow::Result<()> {
    let body = api.get(&format!("/itineraries{}", query_string(search, filter)))?;
    if json_output {
        return print_json(&body);
    }
    let list: ItineraryList = serde_json::from_value(body)?;
    if list.itineraries.is_empty() {
        eprintln!("No itineraries ({} total)", list.total);
        return Ok(());
    }
    for it in &list.itineraries {
        println!("{}", format_itinerary(it));
    }
    println!("\n{} of {} shown", list.shown, list.total);
    Ok(())
}

fn do_itinerary(api: &Api, id: &str, json_output: bool) -> anyhow::Result<()> {
    let body = api.get(&format!("/itineraries/{}", encode_component(id)))?;
    if json_output {
        return print_json(&body);
    }
    let detail: ItineraryDetail = serde_json::from_value(body)?;
    println!("{}\n", format_itinerary(&detail.itinerary));
    if detail.days.is_empty() {
        println!("No activities planned yet.");
    }
    for day in &detail.days {
        for line in format_day(day) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn do_wishlist(api: &Api, json_output: bool) -> anyhow::Result<()> {
    let body = api.get("/wishlist")?;
    if json_output {
        return print_json(&body);
    }
    let photos: Vec<PhotoLine> = serde_json::from_value(body["photos"].clone())?;
    if photos.is_empty() {
        eprintln!("Your wishlist is empty");
        return Ok(());
    }
    for p in &photos {
        println!("{}", format_photo(p, true));
    }
    Ok(())
}

fn do_discover(api: &Api, more: bool, json_output: bool) -> anyhow::Result<()> {
    if more {
        api.invoke(json!({ "type": "load_more_photos" }))?;
    }
    let body = api.get("/discover")?;
    if json_output {
        return print_json(&body);
    }
    let photos: Vec<PhotoLine> = serde_json::from_value(body["photos"].clone())?;
    let wishlist: Vec<String> =
        serde_json::from_value(body["wishlistIds"].clone()).unwrap_or_default();
    for p in &photos {
        println!("{}", format_photo(p, wishlist.contains(&p.id)));
    }
    println!("\n{} photos", photos.len());
    Ok(())
}

fn do_favorite(api: &Api, id: &str, value: bool) -> anyhow::Result<()> {
    api.invoke(json!({ "type": "toggle_favorite", "id": id, "is_favorite": value }))?;
    println!("{} {}", if value { "Favorited" } else { "Unfavorited" }, id);
    Ok(())
}

fn do_delete(api: &Api, id: &str) -> anyhow::Result<()> {
    let value = api.invoke(json!({ "type": "delete_itinerary", "id": id }))?;
    println!(
        "Deleted {} ({} activities)",
        id,
        value["deletedActivities"].as_u64().unwrap_or(0)
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();
    let server = cli.server.trim_end_matches('/').to_string();
    let json_output = cli.json;

    let result = Api::new(&server).and_then(|api| match cli.command {
        Commands::Status => do_status(&api, json_output),
        Commands::Login {
            email,
            password,
            sign_up,
            name,
        } => do_login(&api, &email, &password, sign_up, name, json_output),
        Commands::Logout => do_logout(&api),
        Commands::Itineraries { search, filter } => {
            do_itineraries(&api, search.as_deref(), filter.as_deref(), json_output)
        }
        Commands::Itinerary { id } => do_itinerary(&api, &id, json_output),
        Commands::Wishlist => do_wishlist(&api, json_output),
        Commands::Discover { more } => do_discover(&api, more, json_output),
        Commands::Favorite { id, value } => do_favorite(&api, &id, value),
        Commands::Delete { id } => do_delete(&api, &id),
    });

    if let Err(e) = result {
        eprintln!("tripnest-cli: {}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================
