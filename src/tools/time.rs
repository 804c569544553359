//! Current time in any IANA timezone (default Asia/Seoul).
//!
//! Zone data comes from chrono-tz. Korean and English city or country names
//! are accepted as aliases on top of the IANA names.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeDelta, Utc, Weekday};
use chrono_tz::{OffsetComponents, Tz};
use serde_json::{json, Map, Value};

use crate::tools::{opt_str, opt_strings, Tool, ToolError, ToolResult};

const FALLBACK_ZONE: Tz = Tz::Asia__Seoul;

/// Cities listed by the detailed format.
const MAJOR_CITIES: &[(&str, &[&str])] = &[
    ("Asia/Seoul", &["서울", "부산", "인천"]),
    ("Asia/Tokyo", &["도쿄", "오사카", "요코하마"]),
    ("Asia/Shanghai", &["베이징", "상하이", "광저우"]),
    ("Asia/Hong_Kong", &["홍콩"]),
    ("Asia/Singapore", &["싱가포르"]),
    ("America/New_York", &["뉴욕", "워싱턴DC", "보스턴"]),
    ("America/Chicago", &["시카고", "댈러스", "휴스턴"]),
    ("America/Los_Angeles", &["로스앤젤레스", "샌프란시스코", "라스베이거스"]),
    ("Europe/London", &["런던", "맨체스터", "에든버러"]),
    ("Europe/Paris", &["파리", "마르세유", "리옹"]),
    ("Europe/Berlin", &["베를린", "뮌헨", "함부르크"]),
    ("Europe/Moscow", &["모스크바"]),
    ("Australia/Sydney", &["시드니", "멜버른"]),
];

/// Lower-case alias → zone name.
pub const ALIASES: &[(&str, &str)] = &[
    ("한국", "Asia/Seoul"),
    ("서울", "Asia/Seoul"),
    ("seoul", "Asia/Seoul"),
    ("korea", "Asia/Seoul"),
    ("도쿄", "Asia/Tokyo"),
    ("tokyo", "Asia/Tokyo"),
    ("일본", "Asia/Tokyo"),
    ("japan", "Asia/Tokyo"),
    ("베이징", "Asia/Shanghai"),
    ("beijing", "Asia/Shanghai"),
    ("상하이", "Asia/Shanghai"),
    ("shanghai", "Asia/Shanghai"),
    ("중국", "Asia/Shanghai"),
    ("china", "Asia/Shanghai"),
    ("홍콩", "Asia/Hong_Kong"),
    ("hong kong", "Asia/Hong_Kong"),
    ("싱가포르", "Asia/Singapore"),
    ("singapore", "Asia/Singapore"),
    ("뉴욕", "America/New_York"),
    ("new york", "America/New_York"),
    ("미국동부", "America/New_York"),
    ("us east", "America/New_York"),
    ("로스앤젤레스", "America/Los_Angeles"),
    ("los angeles", "America/Los_Angeles"),
    ("la", "America/Los_Angeles"),
    ("라스베가스", "America/Los_Angeles"),
    ("vegas", "America/Los_Angeles"),
    ("las vegas", "America/Los_Angeles"),
    ("미국서부", "America/Los_Angeles"),
    ("us west", "America/Los_Angeles"),
    ("시카고", "America/Chicago"),
    ("chicago", "America/Chicago"),
    ("미국중부", "America/Chicago"),
    ("us central", "America/Chicago"),
    ("런던", "Europe/London"),
    ("london", "Europe/London"),
    ("영국", "Europe/London"),
    ("uk", "Europe/London"),
    ("파리", "Europe/Paris"),
    ("paris", "Europe/Paris"),
    ("프랑스", "Europe/Paris"),
    ("france", "Europe/Paris"),
    ("베를린", "Europe/Berlin"),
    ("berlin", "Europe/Berlin"),
    ("독일", "Europe/Berlin"),
    ("germany", "Europe/Berlin"),
    ("모스크바", "Europe/Moscow"),
    ("moscow", "Europe/Moscow"),
    ("러시아", "Europe/Moscow"),
    ("russia", "Europe/Moscow"),
    ("시드니", "Australia/Sydney"),
    ("sydney", "Australia/Sydney"),
    ("호주", "Australia/Sydney"),
    ("australia", "Australia/Sydney"),
    ("utc", "UTC"),
    ("gmt", "GMT"),
];

/// Resolve an alias or IANA name (case-insensitive). Unknown input falls
/// back to `default`.
pub fn normalize_timezone(input: &str, default: Tz) -> Tz {
    let key = input.trim().to_lowercase();
    if key.is_empty() {
        return default;
    }
    if let Some((_, name)) = ALIASES.iter().find(|(alias, _)| *alias == key) {
        return Tz::from_str(name).unwrap_or(default);
    }
    Tz::from_str_insensitive(input.trim()).unwrap_or(default)
}

/// First alias mentioned anywhere in free text. Multi-word and longer
/// aliases win over shorter ones ("las vegas" before "la"); ASCII aliases
/// must stand on word boundaries.
pub fn find_timezone_alias(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    let mut candidates: Vec<&(&str, &str)> = ALIASES.iter().collect();
    candidates.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.chars().count()));

    candidates
        .into_iter()
        .find(|(alias, _)| contains_word(&lower, alias))
        .map(|(_, name)| *name)
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    if !needle.is_ascii() {
        return haystack.contains(needle);
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphanumeric())
            && !after.is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

fn korean_weekday(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "월요일",
        Weekday::Tue => "화요일",
        Weekday::Wed => "수요일",
        Weekday::Thu => "목요일",
        Weekday::Fri => "금요일",
        Weekday::Sat => "토요일",
        Weekday::Sun => "일요일",
    }
}

/// Time details for `zone` at the instant `now`.
pub fn time_info(zone: Tz, now: DateTime<Utc>) -> Value {
    let local = now.with_timezone(&zone);
    let dst = local.offset().dst_offset() != TimeDelta::zero();
    let name = zone.name();

    json!({
        "timezone": name,
        "timezone_name": name.rsplit('/').next().unwrap_or(name),
        "current_time": local.format("%Y-%m-%d %H:%M:%S").to_string(),
        "iso_format": local.to_rfc3339(),
        "timestamp": local.timestamp(),
        "weekday": local.format("%A").to_string(),
        "weekday_kr": korean_weekday(local.weekday()),
        "date_kr": local.format("%Y년 %m월 %d일").to_string(),
        "time_kr": local.format("%H시 %M분 %S초").to_string(),
        "utc_offset": local.format("%z").to_string(),
        "dst": dst,
    })
}

fn aliases_for(zone_name: &str) -> Vec<&'static str> {
    ALIASES
        .iter()
        .filter(|(_, name)| *name == zone_name)
        .map(|(alias, _)| *alias)
        .collect()
}

fn major_cities(zone_name: &str) -> Vec<&str> {
    match MAJOR_CITIES.iter().find(|(name, _)| *name == zone_name) {
        Some((_, cities)) => cities.to_vec(),
        None => vec![zone_name.rsplit('/').next().unwrap_or(zone_name)],
    }
}

pub struct TimeTool {
    default_zone: Tz,
}

impl TimeTool {
    /// `default_timezone` may be an alias or zone name; unknown values fall
    /// back to Asia/Seoul.
    pub fn new(default_timezone: &str) -> Self {
        Self {
            default_zone: normalize_timezone(default_timezone, FALLBACK_ZONE),
        }
    }

    pub fn run(&self, args: &Map<String, Value>, now: DateTime<Utc>) -> Result<ToolResult, ToolError> {
        let format = opt_str(args, "format")?.unwrap_or("standard");
        let zones = opt_strings(args, "zones")?.unwrap_or_default();

        if format == "multiple" && !zones.is_empty() {
            let infos = zones
                .iter()
                .map(|z| time_info(normalize_timezone(z, self.default_zone), now))
                .collect::<Vec<_>>();
            return Ok(ToolResult::success(json!({
                "format": "multiple",
                "total_zones": infos.len(),
                "timezones": infos,
            })));
        }

        let requested = opt_str(args, "timezone")?.unwrap_or("");
        let zone = normalize_timezone(requested, self.default_zone);
        let mut info = time_info(zone, now);

        if format == "detailed" {
            if let Some(obj) = info.as_object_mut() {
                obj.insert("available_aliases".into(), json!(aliases_for(zone.name())));
                obj.insert("major_cities".into(), json!(major_cities(zone.name())));
            }
        }
        Ok(ToolResult::success(info))
    }
}

#[async_trait]
impl Tool for TimeTool {
    fn name(&self) -> &str {
        "time_now"
    }

    fn description(&self) -> &str {
        "현재 시간을 다양한 시간대로 조회 (기본: 아시아/서울)"
    }

    fn category(&self) -> &str {
        "time"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "시간대 (기본: 서울). 예: '서울', '뉴욕', '런던', 'Asia/Seoul', 'UTC' 등",
                    "default": "서울"
                },
                "format": {
                    "type": "string",
                    "description": "출력 형식 선택",
                    "enum": ["standard", "detailed", "multiple"],
                    "default": "standard"
                },
                "zones": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "multiple 형식일 때 여러 시간대 목록 (예: ['서울', '뉴욕', '런던'])",
                    "default": []
                }
            }
        })
    }

    async fn execute(&self, args: &Map<String, Value>) -> Result<ToolResult, ToolError> {
        self.run(args, Utc::now())
    }
}
