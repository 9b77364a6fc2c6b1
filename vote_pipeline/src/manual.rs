/*!

This is the long-form manual for `vote_pipeline` and `votewh`.

## Input format

Votes are read from newline-delimited JSON files: one object per line, with the keys
`Id`, `PostId`, `VoteTypeId`, `CreationDate`, `UserId` and `BountyAmount`.

```text
{"Id":"1","PostId":"1","VoteTypeId":"2","CreationDate":"2022-01-02T00:00:00.000"}
{"Id":"2","PostId":"3","VoteTypeId":"8","CreationDate":"2022-01-03T00:00:00.000","UserId":"9","BountyAmount":"50"}
```

Values may be strings or native JSON numbers. Missing keys and `null` values are absent
fields. Other keys are ignored. Blank lines are skipped, and lines that are not a JSON
object are dropped with a warning.

## Stages

Each file goes through three stages, each one replacing its output inside a transaction:

1. the lines are loaded as text into `staging_votes_load`, with their line number
2. every row is checked and written to `staging_votes` with a status and an error description
3. the rows with status `READYTOLOAD` are merged into `votes`

### Validation

| field          | required | type                        | message                |
|----------------|----------|-----------------------------|------------------------|
| `Id`           | yes      | 64-bit integer              | `Invalid Id`           |
| `CreationDate` | yes      | timestamp                   | `Invalid CreationDate` |
| `PostId`       | no       | 64-bit integer              | `Invalid PostId`       |
| `VoteTypeId`   | no       | 64-bit integer              | `Invalid VoteTypeId`   |
| `UserId`       | no       | 64-bit integer              | `Invalid UserId`       |
| `BountyAmount` | no       | decimal, two fractional digits | `Invalid BountyAmount` |

Timestamps are accepted as `2022-01-02T03:04:05.678`, `2022-01-02 03:04:05`,
RFC 3339 with an offset (converted to UTC) or a plain date.

Rows sharing an `Id` (compared as integers when they parse) are ranked by `CreationDate`,
latest first, then by line number. Every row after the first one is marked
`Duplicate record`. A row with a failed rule has status `FAILED`, even when it is
also a duplicate; its description lists all its failures, joined with `; `.

Note that the ranking does not look at the validity of the rows: when the latest row of an
`Id` is invalid, the older valid rows are still duplicates and nothing is loaded for that
`Id` from this file.

### Merge

The operational table keeps one row per `Id`. A ready row is inserted when its `Id` is
new, and replaces the stored row when its `CreationDate` is the same or later. An older
row never overwrites a newer one, so the files may be ingested in any order and any
number of times. `InsertedAt` records when the row was last written.

## Outliers

The view `weekly_vote_counts` counts the votes per `(Year, WeekNumber)`, and the view
`outlier_weeks` keeps the weeks whose count is below 80% or above 120% of the mean count
of all weeks, ordered by year and week.

The week number is the ISO week, with one exception kept for compatibility with
existing reports: a date in the first seven days of January that falls on a Thursday or
later in the week is in week 0. The year is always the calendar year of the date.

## Command line

```text
votewh [--db PATH] [--config FILE] [--verbose] ingest [FILES...]
votewh [--db PATH] [--config FILE] [--verbose] outliers [--out PATH|stdout] [--reference FILE]
votewh [--db PATH] [--verbose] query SQL
```

The outlier report is a JSON document:

```text
{
  "bucketCount": 9,
  "meanVoteCount": 1.7777777777777777,
  "outliers": [
    {"Year": 2022, "WeekNumber": 0, "VoteCount": 1}
  ]
}
```

With `--reference`, the report is compared with the given file and the differences are
printed. A mismatch is an error.

## Configuration

All the settings may be given in a JSON file:

```text
{
  "databasePath": "data/warehouse.db",
  "sources": [
    {"filePath": "votes/2022-01.jsonl"},
    {"filePath": "votes/2022-02.jsonl"}
  ],
  "outputPath": "reports/outliers.json"
}
```

Relative paths are resolved against the directory of the configuration file. Flags on the
command line take precedence. The default database is `warehouse.db` in the current
directory.

The log level is controlled with `RUST_LOG`, or set to `debug` with `--verbose`.

 */
