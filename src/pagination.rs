use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Sortable columns. Only these names ever reach the SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Id,
    Guid,
    Plate,
    Anpr,
    Rfid,
    DataStatus,
    Gantry,
    Lane,
    Kph,
    Ambush,
    Direction,
    Vehicle,
    Issue,
    Status,
}

impl SortField {
    fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "id" => SortField::Id,
            "guid" => SortField::Guid,
            "plate" => SortField::Plate,
            "anpr" => SortField::Anpr,
            "rfid" => SortField::Rfid,
            "dataStatus" => SortField::DataStatus,
            "gantry" => SortField::Gantry,
            "lane" => SortField::Lane,
            "kph" => SortField::Kph,
            "ambush" => SortField::Ambush,
            "direction" => SortField::Direction,
            "vehicle" => SortField::Vehicle,
            "issue" => SortField::Issue,
            "status" => SortField::Status,
            _ => return None,
        };
        Some(field)
    }

    pub fn column(self) -> &'static str {
        match self {
            SortField::Id => "id",
            SortField::Guid => "guid",
            SortField::Plate => "plate",
            SortField::Anpr => "anpr",
            SortField::Rfid => "rfid",
            SortField::DataStatus => "data_status",
            SortField::Gantry => "gantry",
            SortField::Lane => "lane",
            SortField::Kph => "kph",
            SortField::Ambush => "ambush",
            SortField::Direction => "direction",
            SortField::Vehicle => "vehicle",
            SortField::Issue => "issue",
            SortField::Status => "status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
    pub sort: Vec<(SortField, Direction)>,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: Vec::new(),
        }
    }
}

impl PageRequest {
    /// Parses `page`, `size` and repeated `sort=<field>[,<asc|desc>]`
    /// parameters from a raw query string. Unrelated parameters are ignored.
    pub fn parse(query_string: &str) -> Result<Self, AppError> {
        let mut request = PageRequest::default();

        for (key, value) in url::form_urlencoded::parse(query_string.as_bytes()) {
            match key.as_ref() {
                "page" => request.page = parse_number("page", &value)?,
                "size" => {
                    let size = parse_number("size", &value)?;
                    if size == 0 || size > MAX_PAGE_SIZE {
                        return Err(AppError::InvalidRequest(format!(
                            "size must be between 1 and {}",
                            MAX_PAGE_SIZE
                        )));
                    }
                    request.size = size;
                }
                "sort" => request.sort.push(parse_sort(&value)?),
                _ => {}
            }
        }

        if request.checked_offset().is_none() {
            return Err(AppError::InvalidRequest(format!(
                "page {} is out of range for size {}",
                request.page, request.size
            )));
        }
        Ok(request)
    }

    fn checked_offset(&self) -> Option<i64> {
        self.page
            .checked_mul(self.size)
            .and_then(|offset| i64::try_from(offset).ok())
    }

    /// Row offset of the first item on the page. Requests built by `parse`
    /// always fit; anything larger is clamped.
    pub fn offset(&self) -> i64 {
        self.checked_offset().unwrap_or(i64::MAX)
    }

    /// `ORDER BY` clause; `id` is always the final tie-breaker.
    pub fn order_by(&self) -> String {
        let mut terms: Vec<String> = self
            .sort
            .iter()
            .map(|(field, direction)| format!("{} {}", field.column(), direction.as_sql()))
            .collect();
        if !self.sort.iter().any(|(field, _)| *field == SortField::Id) {
            terms.push("id ASC".to_string());
        }
        terms.join(", ")
    }
}

fn parse_number(name: &str, value: &str) -> Result<usize, AppError> {
    value
        .parse()
        .map_err(|_| AppError::InvalidRequest(format!("{} must be a non-negative integer", name)))
}

fn parse_sort(value: &str) -> Result<(SortField, Direction), AppError> {
    let mut parts = value.split(',').map(str::trim);
    let name = parts.next().unwrap_or_default();
    let field = SortField::parse(name)
        .ok_or_else(|| AppError::InvalidRequest(format!("cannot sort by '{}'", name)))?;
    let direction = match parts.next().map(|d| d.to_ascii_lowercase()).as_deref() {
        None | Some("asc") => Direction::Asc,
        Some("desc") => Direction::Desc,
        Some(other) => {
            return Err(AppError::InvalidRequest(format!(
                "unknown sort direction '{}'",
                other
            )))
        }
    };
    Ok((field, direction))
}
