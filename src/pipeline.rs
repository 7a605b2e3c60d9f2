// 🛤️ Pipelines - Rules as data
//
// The three imports share one engine; everything that differs between them
// (header literals, status vocabulary, always-open statuses, mandatory
// columns) lives in this table.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::columns::{Field, HeaderTable};
use crate::status::{EntityKind, StatusCatalog, StatusStream};

// ============================================================================
// HEADER TABLES
// ============================================================================

static MAIL_HEADERS: HeaderTable = HeaderTable::new(&[
    ("Guia", Field::Key),
    ("Estado Guia", Field::Status),
    ("Ultimo Evento Nombre", Field::Description),
    ("Ubicacion", Field::Location),
]);

static SALE_HEADERS: HeaderTable = HeaderTable::new(&[
    ("SDS", Field::Key),
    ("CODIGO VENTA", Field::Key),
    ("DESCRIPCION ESTADO", Field::Status),
    ("OBSERVACIONES", Field::Description),
]);

static LINE_HEADERS: HeaderTable = HeaderTable::new(&[
    ("CODIGO VENTA", Field::Key),
    ("ESTADO LINEA", Field::Status),
    ("DETALLE", Field::Description),
    ("CLIENTE", Field::Customer),
    ("LINEA", Field::LineNumber),
    ("VENDEDOR", Field::Salesperson),
]);

// ============================================================================
// STATUS CATALOGS
// ============================================================================

static MAIL_STATUSES: StatusCatalog = StatusCatalog::new(
    &[
        "INICIAL",
        "EN TRANSITO",
        "EN SUCURSAL",
        "EN DISTRIBUCION",
        "ENTREGADO",
        "NO ENTREGADO",
        "DEVUELTO",
        "CANCELADO",
    ],
    &["INICIAL"],
);

static SALE_STATUSES: StatusCatalog = StatusCatalog::new(
    &[
        "PENDIENTE DE CARGA",
        "CREADO DOCU OK",
        "CREADO",
        "CREADO SIN DOCU",
        "EN PROCESO",
        "APROBADO",
        "RECHAZADO",
        "ACTIVADO",
        "CANCELADO",
    ],
    &["PENDIENTE DE CARGA", "CREADO DOCU OK"],
);

static LINE_STATUSES: StatusCatalog = StatusCatalog::new(
    &[
        "PENDIENTE DE ACTIVACION",
        "ACTIVADA",
        "SUSPENDIDA",
        "PORTABILIDAD EN CURSO",
        "RECHAZADA",
        "BAJA",
    ],
    &["PENDIENTE DE ACTIVACION"],
);

// ============================================================================
// PIPELINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Logistics partner export ("correo")
    Mail,
    /// Sales-tracking spreadsheet, sale status ("venta")
    Sale,
    /// Sales-tracking spreadsheet, line activation ("seguimiento de línea")
    LineTracking,
}

impl Pipeline {
    pub const ALL: [Pipeline; 3] = [Pipeline::Mail, Pipeline::Sale, Pipeline::LineTracking];

    /// URL / CLI slug
    pub fn slug(&self) -> &'static str {
        match self {
            Pipeline::Mail => "correo",
            Pipeline::Sale => "ventas",
            Pipeline::LineTracking => "seguimiento-linea",
        }
    }

    /// Accepts the slug and a few English aliases
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "correo" | "mail" => Some(Pipeline::Mail),
            "ventas" | "venta" | "sale" | "sales" => Some(Pipeline::Sale),
            "seguimiento-linea" | "linea" | "line" | "line-tracking" => Some(Pipeline::LineTracking),
            _ => None,
        }
    }

    pub fn stream(&self) -> StatusStream {
        match self {
            Pipeline::Mail => StatusStream::Mail,
            Pipeline::Sale => StatusStream::Sale,
            Pipeline::LineTracking => StatusStream::Line,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.stream().entity_kind()
    }

    pub fn headers(&self) -> &'static HeaderTable {
        match self {
            Pipeline::Mail => &MAIL_HEADERS,
            Pipeline::Sale => &SALE_HEADERS,
            Pipeline::LineTracking => &LINE_HEADERS,
        }
    }

    pub fn catalog(&self) -> &'static StatusCatalog {
        match self {
            Pipeline::Mail => &MAIL_STATUSES,
            Pipeline::Sale => &SALE_STATUSES,
            Pipeline::LineTracking => &LINE_STATUSES,
        }
    }

    /// Columns without which the whole import is aborted
    pub fn required_fields(&self) -> &'static [Field] {
        match self {
            Pipeline::Mail => &[],
            Pipeline::Sale | Pipeline::LineTracking => &[Field::Key, Field::Status],
        }
    }

    /// Noun used in user-facing messages ("Se actualizaron 3 estados de correo")
    pub fn label(&self) -> &'static str {
        match self {
            Pipeline::Mail => "estados de correo",
            Pipeline::Sale => "estados de venta",
            Pipeline::LineTracking => "estados de línea",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}
