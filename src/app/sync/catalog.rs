use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum MediaFormat {
    Tv,
    TvShort,
    Movie,
    Special,
    Ova,
    Ona,
    Music,
    #[serde(other)]
    Unknown,
}

impl MediaFormat {
    pub(crate) fn is_series(self) -> bool {
        matches!(self, Self::Tv | Self::TvShort | Self::Ona | Self::Ova)
    }

    pub(crate) fn is_feature(self) -> bool {
        matches!(self, Self::Movie | Self::Special | Self::Ova | Self::Ona)
    }

    /// Lower ranks win ties when searching for a main season.
    pub(crate) fn series_rank(self) -> u8 {
        match self {
            Self::Tv => 0,
            Self::TvShort => 1,
            Self::Ona => 2,
            Self::Ova => 3,
            _ => 9,
        }
    }

    pub(crate) fn movie_rank(self) -> u8 {
        match self {
            Self::Movie => 0,
            Self::Special => 1,
            Self::Ova => 2,
            Self::Ona => 3,
            _ => 9,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Tv => "TV",
            Self::TvShort => "TV_SHORT",
            Self::Movie => "MOVIE",
            Self::Special => "SPECIAL",
            Self::Ova => "OVA",
            Self::Ona => "ONA",
            Self::Music => "MUSIC",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TitleSet {
    pub(crate) primary: String,
    pub(crate) alternates: Vec<String>,
}

impl TitleSet {
    pub(crate) fn variants(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.alternates.iter().map(String::as_str))
    }
}

/// A target-platform catalog entry returned by a title search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "MediaRecord")]
pub(crate) struct CatalogCandidate {
    pub(crate) target_id: u64,
    pub(crate) titles: TitleSet,
    pub(crate) episode_count: Option<u32>,
    pub(crate) format: MediaFormat,
    pub(crate) start_date: Option<NaiveDate>,
}

impl CatalogCandidate {
    pub(crate) fn primary_title(&self) -> &str {
        &self.titles.primary
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MediaTitle {
    pub(crate) romaji: Option<String>,
    pub(crate) english: Option<String>,
    pub(crate) native: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct FuzzyDate {
    pub(crate) year: Option<i32>,
    pub(crate) month: Option<u32>,
    pub(crate) day: Option<u32>,
}

/// Media record as served by the catalog API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaRecord {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) title: MediaTitle,
    pub(crate) synonyms: Option<Vec<String>>,
    pub(crate) episodes: Option<u32>,
    pub(crate) format: Option<MediaFormat>,
    pub(crate) start_date: Option<FuzzyDate>,
}

impl From<MediaRecord> for CatalogCandidate {
    fn from(record: MediaRecord) -> Self {
        let mut names = Vec::new();
        for name in [record.title.romaji, record.title.english, record.title.native]
            .into_iter()
            .flatten()
            .chain(record.synonyms.into_iter().flatten())
        {
            let trimmed = name.trim();
            if !trimmed.is_empty() && !names.iter().any(|seen: &String| seen == trimmed) {
                names.push(trimmed.to_string());
            }
        }
        let mut names = names.into_iter();
        let primary = names.next().unwrap_or_else(|| "Unknown".to_string());

        CatalogCandidate {
            target_id: record.id,
            titles: TitleSet {
                primary,
                alternates: names.collect(),
            },
            episode_count: record.episodes.filter(|count| *count > 0),
            format: record.format.unwrap_or(MediaFormat::Unknown),
            start_date: record.start_date.as_ref().and_then(resolve_fuzzy_date),
        }
    }
}

/// Missing month sorts to December, missing day to the month's last day.
pub(crate) fn resolve_fuzzy_date(date: &FuzzyDate) -> Option<NaiveDate> {
    let year = date.year?;
    let month = date.month.filter(|m| (1..=12).contains(m)).unwrap_or(12);
    if let Some(day) = date.day
        && let Some(exact) = NaiveDate::from_ymd_opt(year, month, day)
    {
        return Some(exact);
    }
    (28..=31)
        .rev()
        .find_map(|day| NaiveDate::from_ymd_opt(year, month, day))
}
